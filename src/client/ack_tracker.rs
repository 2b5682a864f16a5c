use std::collections::BTreeMap;

use crate::constants::{ACK_MAX_RESENDS, ACK_TIMEOUT_MS};
use crate::protocol::Envelope;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AckTrackerOptions {
    pub timeout_ms: u64,
    pub max_resends: u32,
}

impl Default for AckTrackerOptions {
    fn default() -> Self {
        Self {
            timeout_ms: ACK_TIMEOUT_MS,
            max_resends: ACK_MAX_RESENDS,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum AckEvent {
    Resend(Envelope),
    Failed { message_id: String },
}

#[derive(Clone, Debug)]
struct Outstanding {
    envelope: Envelope,
    sent_at_ms: u64,
    resends: u32,
}

pub struct AckTracker {
    options: AckTrackerOptions,
    outstanding: BTreeMap<String, Outstanding>,
}

impl AckTracker {
    pub fn new(options: AckTrackerOptions) -> Self {
        Self {
            options,
            outstanding: BTreeMap::new(),
        }
    }

    pub fn track(&mut self, envelope: Envelope, now_ms: u64) {
        if envelope.requires_ack != Some(true) {
            return;
        }
        self.outstanding.insert(
            envelope.message_id.clone(),
            Outstanding {
                envelope,
                sent_at_ms: now_ms,
                resends: 0,
            },
        );
    }

    pub fn acknowledge(&mut self, message_id: &str) -> bool {
        self.outstanding.remove(message_id).is_some()
    }

    pub fn outstanding(&self) -> usize {
        self.outstanding.len()
    }

    pub fn poll(&mut self, now_ms: u64) -> Vec<AckEvent> {
        let mut events = Vec::new();
        let mut failed = Vec::new();
        for (message_id, entry) in self.outstanding.iter_mut() {
            if now_ms.saturating_sub(entry.sent_at_ms) < self.options.timeout_ms {
                continue;
            }
            if entry.resends >= self.options.max_resends {
                failed.push(message_id.clone());
                continue;
            }
            entry.resends += 1;
            entry.sent_at_ms = now_ms;
            events.push(AckEvent::Resend(entry.envelope.clone()));
        }
        for message_id in failed {
            self.outstanding.remove(&message_id);
            events.push(AckEvent::Failed { message_id });
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Command;
    use crate::protocol::{cmd_message, ping_message};

    fn tracker() -> AckTracker {
        AckTracker::new(AckTrackerOptions {
            timeout_ms: 100,
            max_resends: 1,
        })
    }

    #[test]
    fn only_ack_requiring_messages_are_tracked() {
        let mut tracker = tracker();
        tracker.track(ping_message(), 0);
        tracker.track(cmd_message(&Command::AdvanceTech), 0);
        assert_eq!(tracker.outstanding(), 1);
    }

    #[test]
    fn resends_once_with_same_id_then_fails() {
        let mut tracker = tracker();
        let envelope = cmd_message(&Command::AdvanceTech);
        let id = envelope.message_id.clone();
        tracker.track(envelope.clone(), 0);

        assert!(tracker.poll(99).is_empty());
        assert_eq!(tracker.poll(100), vec![AckEvent::Resend(envelope)]);
        assert!(tracker.poll(150).is_empty());
        assert_eq!(
            tracker.poll(200),
            vec![AckEvent::Failed {
                message_id: id.clone()
            }]
        );
        assert_eq!(tracker.outstanding(), 0);
        assert!(!tracker.acknowledge(&id));
    }

    #[test]
    fn acknowledged_messages_stop_resending() {
        let mut tracker = tracker();
        let envelope = cmd_message(&Command::AdvanceTech);
        tracker.track(envelope.clone(), 0);
        assert!(tracker.acknowledge(&envelope.message_id));
        assert!(tracker.poll(1_000).is_empty());
    }
}
