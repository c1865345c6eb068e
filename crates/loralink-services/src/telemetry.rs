//! Sensor readings and clock broadcasts: logged, never answered.

use loralink_core::wire::{Message, MessageType};

pub struct TelemetryLogger;

impl TelemetryLogger {
    /// One log line per message. Returns false for types it does not log.
    pub fn log(msg: &Message) -> bool {
        match msg {
            Message::VmData(vm) => {
                for (channel, r) in vm.readings.iter().enumerate() {
                    tracing::info!(
                        peer = %vm.mac,
                        timestamp = vm.timestamp,
                        channel,
                        freq = r.freq,
                        temp = r.temp,
                        "vibrating-wire reading"
                    );
                }
                true
            }
            Message::AdcData(adc) => {
                tracing::info!(
                    peer = %adc.mac,
                    timestamp = adc.timestamp,
                    values = ?adc.adc,
                    "adc reading"
                );
                true
            }
            Message::TimeSync(t) => {
                tracing::debug!(
                    "time sync {:04}-{:02}-{:02} {:02}:{:02}:{:02}",
                    t.year,
                    t.month,
                    t.day,
                    t.hour,
                    t.minute,
                    t.second
                );
                true
            }
            Message::PollData { mac } | Message::PollConfig { mac } => {
                tracing::debug!(peer = %mac, msg_type = ?msg.message_type(), "poll received");
                true
            }
            _ => false,
        }
    }
}

impl crate::service::MessageHandler for TelemetryLogger {
    fn message_types(&self) -> &'static [MessageType] {
        &[
            MessageType::VmData,
            MessageType::AdcData,
            MessageType::TimeSync,
            MessageType::PollData,
            MessageType::PollConfig,
        ]
    }

    fn handle(&self, msg: &Message) -> Option<Message> {
        Self::log(msg);
        None
    }
}
