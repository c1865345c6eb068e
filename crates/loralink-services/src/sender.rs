//! File sender: pushes one file to the gateway as meta, body chunks and
//! end, each acknowledged before the next is read.
//!
//! In sync mode the transfer starts at the offset stored by the resume
//! tracker and, once the gateway acknowledges the end frame, records the
//! new end-of-file offset. A failed pass leaves the record untouched, so
//! the next pass repeats it.

use std::io;
use std::sync::Arc;

use loralink_core::wire::{FileBody, FileMeta, Message, WireError, CHUNK_SIZE};
use loralink_core::DeviceId;

use crate::delivery::{Delivery, DeliveryError, RetryPolicy};
use crate::resume::ResumeTracker;
use crate::store::FileStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferMode {
    /// Send the whole file.
    Full,
    /// Send only what was appended since the last successful sync.
    Sync,
}

/// Which frame of the transfer failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Meta,
    Body { chunk: u32 },
    End,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferReport {
    pub mode: TransferMode,
    /// Offset the body started from.
    pub start_offset: u64,
    /// Offset after the last chunk, recorded in sync mode.
    pub end_offset: u64,
    pub chunks: u32,
    pub bytes: u64,
    /// Every transmission, retransmissions included.
    pub transmissions: u32,
}

#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("{path}: {source}")]
    Store {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("{path} is {size} bytes, larger than a transfer can announce")]
    FileTooLarge { path: String, size: u64 },

    #[error("{path}: {source}")]
    Frame {
        path: String,
        #[source]
        source: WireError,
    },

    #[error("{path}: gateway rejected {stage:?}")]
    Rejected { path: String, stage: Stage },

    #[error("{path}: no answer to {stage:?} after {attempts} attempt(s)")]
    TimedOut {
        path: String,
        stage: Stage,
        attempts: u32,
    },

    #[error("{path}: radio failure during {stage:?}: {source}")]
    Radio {
        path: String,
        stage: Stage,
        #[source]
        source: crate::radio::RadioError,
    },
}

pub struct FileSender {
    local: DeviceId,
    delivery: Delivery,
    store: Arc<dyn FileStore>,
    resume: ResumeTracker,
    policy: RetryPolicy,
}

impl FileSender {
    pub fn new(local: DeviceId, delivery: Delivery, store: Arc<dyn FileStore>, policy: RetryPolicy) -> Self {
        Self {
            local,
            delivery,
            resume: ResumeTracker::new(store.clone()),
            store,
            policy,
        }
    }

    /// Send `path` to whoever answers on the link. Any failed frame ends
    /// the transfer.
    pub async fn send_file(&self, path: &str, mode: TransferMode) -> Result<TransferReport, TransferError> {
        let store_err = |source| TransferError::Store {
            path: path.to_string(),
            source,
        };

        let size = self.store.size(path).map_err(store_err)?;
        let filesize = u32::try_from(size).map_err(|_| TransferError::FileTooLarge {
            path: path.to_string(),
            size,
        })?;

        let start_offset = match mode {
            TransferMode::Full => 0,
            TransferMode::Sync => {
                let offset = self.resume.read_offset(path).map_err(store_err)?;
                if offset > size {
                    tracing::warn!(path, offset, size, "resume offset past end of file, restarting from 0");
                    0
                } else {
                    offset
                }
            }
        };

        let meta = FileMeta::new(self.local, path, filesize).map_err(|source| TransferError::Frame {
            path: path.to_string(),
            source,
        })?;

        tracing::info!(path, size, start_offset, ?mode, "sending file");

        let mut report = TransferReport {
            mode,
            start_offset,
            end_offset: start_offset,
            chunks: 0,
            bytes: 0,
            transmissions: 0,
        };

        self.deliver(path, Stage::Meta, &Message::FileMeta(meta), &mut report).await?;

        let mut offset = start_offset;
        let mut buf = [0u8; CHUNK_SIZE];
        loop {
            let n = self.store.read_at(path, offset, &mut buf).map_err(store_err)?;
            if n == 0 {
                break;
            }
            let body = FileBody::new(self.local, &buf[..n]).map_err(|source| TransferError::Frame {
                path: path.to_string(),
                source,
            })?;
            let stage = Stage::Body { chunk: report.chunks };
            self.deliver(path, stage, &Message::FileBody(body), &mut report).await?;

            offset += n as u64;
            report.chunks += 1;
            report.bytes += n as u64;
        }
        report.end_offset = offset;

        self.deliver(path, Stage::End, &Message::FileEnd { mac: self.local }, &mut report)
            .await?;

        if mode == TransferMode::Sync {
            self.resume.write_offset(path, offset).map_err(store_err)?;
        }

        tracing::info!(
            path,
            chunks = report.chunks,
            bytes = report.bytes,
            transmissions = report.transmissions,
            "file sent"
        );
        Ok(report)
    }

    async fn deliver(
        &self,
        path: &str,
        stage: Stage,
        msg: &Message,
        report: &mut TransferReport,
    ) -> Result<(), TransferError> {
        match self.delivery.send_with_ack(msg, self.policy).await {
            Ok(delivered) => {
                report.transmissions += delivered.attempts;
                Ok(())
            }
            Err(DeliveryError::Rejected { attempts }) => {
                report.transmissions += attempts;
                tracing::warn!(path, ?stage, "transfer rejected by gateway");
                Err(TransferError::Rejected {
                    path: path.to_string(),
                    stage,
                })
            }
            Err(DeliveryError::Exhausted { attempts }) => {
                report.transmissions += attempts;
                tracing::warn!(path, ?stage, attempts, "transfer timed out");
                Err(TransferError::TimedOut {
                    path: path.to_string(),
                    stage,
                    attempts,
                })
            }
            Err(DeliveryError::Radio(source)) => {
                tracing::error!(path, ?stage, error = %source, "radio failure");
                Err(TransferError::Radio {
                    path: path.to_string(),
                    stage,
                    source,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::radio::{Radio, RadioError, RadioLink};
    use crate::signal::{Response, ResponseSignal};
    use crate::store::DiskStore;
    use loralink_core::wire::MessageType;
    use std::sync::Mutex;

    const NODE: DeviceId = DeviceId::new([2, 0, 0, 0, 0, 1]);

    /// Records every frame and answers according to `reply`.
    struct GatewayStub {
        frames: Mutex<Vec<Message>>,
        signal: Arc<ResponseSignal>,
        reply: Box<dyn Fn(&Message, usize) -> Option<Response> + Send + Sync>,
    }

    impl Radio for GatewayStub {
        fn transmit(&self, frame: &[u8]) -> Result<(), RadioError> {
            let msg = Message::decode(frame).unwrap();
            let mut frames = self.frames.lock().unwrap();
            frames.push(msg.clone());
            if let Some(r) = (self.reply)(&msg, frames.len()) {
                self.signal.raise(r);
            }
            Ok(())
        }
        fn set_receive_mode(&self) -> Result<(), RadioError> {
            Ok(())
        }
        fn set_idle_mode(&self) -> Result<(), RadioError> {
            Ok(())
        }
    }

    struct Fixture {
        sender: FileSender,
        radio: Arc<GatewayStub>,
        store: Arc<DiskStore>,
    }

    impl Drop for Fixture {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(self.store.root());
        }
    }

    fn fixture(
        name: &str,
        reply: impl Fn(&Message, usize) -> Option<Response> + Send + Sync + 'static,
    ) -> Fixture {
        let dir = std::env::temp_dir().join(format!("loralink-sender-{}-{}", name, std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        let store = Arc::new(DiskStore::new(dir));
        let signal = Arc::new(ResponseSignal::new());
        let radio = Arc::new(GatewayStub {
            frames: Mutex::new(Vec::new()),
            signal: signal.clone(),
            reply: Box::new(reply),
        });
        let delivery = Delivery::new(RadioLink::new(radio.clone()), signal);
        let sender = FileSender::new(NODE, delivery, store.clone(), RetryPolicy::default());
        Fixture { sender, radio, store }
    }

    fn write_file(store: &DiskStore, path: &str, len: usize) -> Vec<u8> {
        let data: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
        store.ensure_append(path).unwrap();
        store.append(path, &data).unwrap();
        data
    }

    fn types(radio: &GatewayStub) -> Vec<MessageType> {
        radio.frames.lock().unwrap().iter().map(Message::message_type).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn thousand_bytes_is_five_chunks() {
        let f = fixture("log", |_, _| Some(Response::Ack));
        write_file(&f.store, "/data/log.txt", 1000);

        let report = f.sender.send_file("/data/log.txt", TransferMode::Full).await.unwrap();

        assert_eq!(report.chunks, 5);
        assert_eq!(report.bytes, 1000);
        assert_eq!(report.transmissions, 7);
        let mut expected = vec![MessageType::FileMeta];
        expected.extend([MessageType::FileBody; 5]);
        expected.push(MessageType::FileEnd);
        assert_eq!(types(&f.radio), expected);

        let frames = f.radio.frames.lock().unwrap();
        match &frames[0] {
            Message::FileMeta(meta) => {
                assert_eq!(meta.filename(), "/data/log.txt");
                assert_eq!(meta.filesize, 1000);
            }
            other => panic!("expected FileMeta, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn tail_chunk_is_short() {
        let f = fixture("tail", |_, _| Some(Response::Ack));
        let data = write_file(&f.store, "/data/log.txt", 2050);

        let report = f.sender.send_file("/data/log.txt", TransferMode::Full).await.unwrap();
        assert_eq!(report.chunks, 11);

        let frames = f.radio.frames.lock().unwrap();
        let mut rebuilt = Vec::new();
        for msg in frames.iter() {
            if let Message::FileBody(body) = msg {
                rebuilt.extend_from_slice(body.data());
            }
        }
        assert_eq!(rebuilt, data);
        match &frames[11] {
            Message::FileBody(body) => assert_eq!(body.len(), 50),
            other => panic!("expected last FileBody, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_meta_sends_nothing_else() {
        let f = fixture("reject", |_, _| Some(Response::Reject));
        write_file(&f.store, "/data/log.txt", 300);

        let err = f.sender.send_file("/data/log.txt", TransferMode::Full).await.unwrap_err();
        assert!(matches!(err, TransferError::Rejected { stage: Stage::Meta, .. }));
        assert_eq!(types(&f.radio), vec![MessageType::FileMeta]);
    }

    #[tokio::test(start_paused = true)]
    async fn silent_gateway_times_out_after_three_meta_frames() {
        let f = fixture("silent", |_, _| None);
        write_file(&f.store, "/data/log.txt", 10);

        let err = f.sender.send_file("/data/log.txt", TransferMode::Full).await.unwrap_err();
        assert!(matches!(err, TransferError::TimedOut { stage: Stage::Meta, attempts: 3, .. }));
        assert_eq!(types(&f.radio), vec![MessageType::FileMeta; 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn sync_sends_only_new_bytes_and_records_offset() {
        let f = fixture("sync", |_, _| Some(Response::Ack));
        write_file(&f.store, "/data/log.txt", 1000);

        let first = f.sender.send_file("/data/log.txt", TransferMode::Sync).await.unwrap();
        assert_eq!((first.start_offset, first.end_offset), (0, 1000));
        assert_eq!(f.store.read_to_string("/data/log.meta").unwrap(), "1000\n");

        f.store.append("/data/log.txt", &[7u8; 150]).unwrap();
        f.radio.frames.lock().unwrap().clear();

        let second = f.sender.send_file("/data/log.txt", TransferMode::Sync).await.unwrap();
        assert_eq!(second.start_offset, 1000);
        assert_eq!(second.chunks, 1);
        assert_eq!(second.bytes, 150);
        assert_eq!(f.store.read_to_string("/data/log.meta").unwrap(), "1150\n");

        // meta still announces the full size
        let frames = f.radio.frames.lock().unwrap();
        match &frames[0] {
            Message::FileMeta(meta) => assert_eq!(meta.filesize, 1150),
            other => panic!("expected FileMeta, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn failed_sync_keeps_old_offset() {
        // ack meta and the first body, then go silent
        let f = fixture("sync-fail", |msg, _| match msg {
            Message::FileBody(body) if body.data()[0] == 0 => Some(Response::Ack),
            Message::FileMeta(_) => Some(Response::Ack),
            _ => None,
        });
        write_file(&f.store, "/data/log.txt", 600);

        let err = f.sender.send_file("/data/log.txt", TransferMode::Sync).await.unwrap_err();
        assert!(matches!(err, TransferError::TimedOut { stage: Stage::Body { chunk: 1 }, .. }));
        assert_eq!(f.store.read_to_string("/data/log.meta").unwrap(), "0\n");
    }

    #[tokio::test(start_paused = true)]
    async fn stale_offset_past_end_restarts() {
        let f = fixture("stale", |_, _| Some(Response::Ack));
        write_file(&f.store, "/data/log.txt", 100);
        f.store.write_string("/data/log.meta", "5000\n").unwrap();

        let report = f.sender.send_file("/data/log.txt", TransferMode::Sync).await.unwrap();
        assert_eq!(report.start_offset, 0);
        assert_eq!(report.bytes, 100);
        assert_eq!(f.store.read_to_string("/data/log.meta").unwrap(), "100\n");
    }

    #[tokio::test(start_paused = true)]
    async fn up_to_date_sync_sends_meta_and_end_only() {
        let f = fixture("uptodate", |_, _| Some(Response::Ack));
        write_file(&f.store, "/data/log.txt", 100);
        f.store.write_string("/data/log.meta", "100\n").unwrap();

        let report = f.sender.send_file("/data/log.txt", TransferMode::Sync).await.unwrap();
        assert_eq!(report.chunks, 0);
        assert_eq!(types(&f.radio), vec![MessageType::FileMeta, MessageType::FileEnd]);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_file_is_a_store_error() {
        let f = fixture("missing", |_, _| Some(Response::Ack));
        let err = f.sender.send_file("/data/nope.txt", TransferMode::Full).await.unwrap_err();
        assert!(matches!(err, TransferError::Store { .. }));
        assert!(types(&f.radio).is_empty());
    }
}
