use std::sync::atomic::{AtomicU64, Ordering};

macro_rules! dispatch_counters {
    ($($(#[$doc:meta])* $name:ident => $record:ident,)*) => {
        /// Counters of the inbound dispatch path, shared between the
        /// [`Handler`](crate::Handler) and its sessions.
        #[derive(Debug, Default)]
        pub struct DispatchStats {
            $($name: AtomicU64,)*
            pending: AtomicU64,
        }

        impl DispatchStats {
            $(
                $(#[$doc])*
                pub fn $name(&self) -> u64 {
                    self.$name.load(Ordering::Relaxed)
                }

                pub(crate) fn $record(&self) {
                    self.$name.fetch_add(1, Ordering::Relaxed);
                }
            )*

            /// Number of requests currently waiting for their response
            pub fn pending(&self) -> u64 {
                self.pending.load(Ordering::Relaxed)
            }

            pub(crate) fn set_pending(&self, pending: usize) {
                self.pending.store(pending as u64, Ordering::Relaxed);
            }

            /// A copy of all counters
            pub fn snapshot(&self) -> DispatchSnapshot {
                DispatchSnapshot {
                    $($name: self.$name(),)*
                    pending: self.pending(),
                }
            }
        }

        /// Point in time copy of [`DispatchStats`]
        #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
        pub struct DispatchSnapshot {
            $($(#[$doc])* pub $name: u64,)*
            pub pending: u64,
        }
    };
}

dispatch_counters! {
    /// Responses that resolved a pending request
    responses => record_response,
    /// Event frames received
    events => record_event,
    /// Responses without a waiting caller
    unmatched_responses => record_unmatched_response,
    /// Events without any listener
    unhandled_events => record_unhandled_event,
    /// Frames that were neither a response nor an event
    malformed_frames => record_malformed_frame,
    /// Listeners that returned an error or panicked
    listener_failures => record_listener_failure,
    /// Requests that exceeded their deadline
    timeouts => record_timeout,
    /// Requests whose caller went away before the response arrived
    cancelled => record_cancelled,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_counters() {
        let stats = DispatchStats::default();
        stats.record_event();
        stats.record_event();
        stats.record_unhandled_event();
        stats.set_pending(3);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.events, 2);
        assert_eq!(snapshot.unhandled_events, 1);
        assert_eq!(snapshot.responses, 0);
        assert_eq!(snapshot.pending, 3);
    }
}
