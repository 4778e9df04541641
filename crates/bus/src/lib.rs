//! Low-latency PCM bus between the audio tap and the recording writer.
//!
//! The tap callback runs on a hardware thread and must never block, so the
//! sender only ever does a `try_send` and counts what it had to drop.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Default capture sample rate for scan audio.
pub const DEFAULT_SAMPLE_RATE: u32 = 48_000;

/// Typical tap buffer duration in milliseconds.
pub const TAP_BUFFER_MS: u32 = 20;

/// Default buffer capacity in milliseconds.
pub const DEFAULT_BUFFER_CAPACITY_MS: u32 = 2000;

/// A block of mono PCM delivered by the audio tap.
#[derive(Debug, Clone)]
pub struct PcmChunk {
    /// Monotonic sequence number assigned by the sender.
    pub seq: u64,
    /// Wall clock milliseconds when the tap produced the block.
    pub ts_ms: i64,
    pub sample_rate: u32,
    /// Samples in `[-1.0, 1.0]`, shared so fan-out does not copy.
    pub samples: Arc<[f32]>,
}

impl PcmChunk {
    pub fn new(seq: u64, ts_ms: i64, sample_rate: u32, samples: impl Into<Arc<[f32]>>) -> Self {
        Self {
            seq,
            ts_ms,
            sample_rate,
            samples: samples.into(),
        }
    }

    /// Duration of this chunk in milliseconds.
    pub fn duration_ms(&self) -> u64 {
        if self.sample_rate == 0 {
            return 0;
        }
        (self.samples.len() as u64 * 1000) / self.sample_rate as u64
    }
}

/// Configuration for the PCM bus.
#[derive(Debug, Clone)]
pub struct PcmBusConfig {
    /// Target buffer capacity in milliseconds.
    pub capacity_ms: u32,
    /// Expected tap block size in milliseconds.
    pub block_ms: u32,
}

impl Default for PcmBusConfig {
    fn default() -> Self {
        Self {
            capacity_ms: DEFAULT_BUFFER_CAPACITY_MS,
            block_ms: TAP_BUFFER_MS,
        }
    }
}

impl PcmBusConfig {
    fn channel_capacity(&self) -> usize {
        if self.block_ms == 0 {
            return 32;
        }
        ((self.capacity_ms / self.block_ms) as usize).max(8)
    }
}

/// Sender half, handed to the audio engine's tap.
#[derive(Clone)]
pub struct PcmBusSender {
    tx: mpsc::Sender<PcmChunk>,
    seq_counter: Arc<AtomicU64>,
    dropped_chunks: Arc<AtomicU64>,
}

impl PcmBusSender {
    /// Push a block without blocking. Returns `false` if the block was dropped.
    pub fn send(&self, ts_ms: i64, sample_rate: u32, samples: impl Into<Arc<[f32]>>) -> bool {
        let seq = self.seq_counter.fetch_add(1, Ordering::Relaxed);
        let chunk = PcmChunk::new(seq, ts_ms, sample_rate, samples);

        match self.tx.try_send(chunk) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                let dropped = self.dropped_chunks.fetch_add(1, Ordering::Relaxed) + 1;
                if dropped % 10 == 1 {
                    tracing::warn!(dropped, seq, "PCM bus full, dropping tap blocks");
                }
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!("PCM bus closed");
                false
            }
        }
    }

    pub fn dropped_chunks(&self) -> u64 {
        self.dropped_chunks.load(Ordering::Relaxed)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Receiver half, owned by the recording writer task.
pub struct PcmBusReceiver {
    rx: mpsc::Receiver<PcmChunk>,
    last_seq: Option<u64>,
    gaps_detected: u64,
}

impl PcmBusReceiver {
    pub async fn recv(&mut self) -> Option<PcmChunk> {
        let chunk = self.rx.recv().await?;
        self.track(&chunk);
        Some(chunk)
    }

    pub fn try_recv(&mut self) -> Option<PcmChunk> {
        let chunk = self.rx.try_recv().ok()?;
        self.track(&chunk);
        Some(chunk)
    }

    /// Number of sequence numbers skipped because the sender dropped them.
    pub fn gaps_detected(&self) -> u64 {
        self.gaps_detected
    }

    /// Stop accepting new blocks; already queued blocks stay readable.
    pub fn close(&mut self) {
        self.rx.close();
    }

    fn track(&mut self, chunk: &PcmChunk) {
        if let Some(last) = self.last_seq {
            if chunk.seq > last + 1 {
                let gap = chunk.seq - last - 1;
                self.gaps_detected += gap;
                tracing::debug!(gap, from = last, to = chunk.seq, "PCM bus gap detected");
            }
        }
        self.last_seq = Some(chunk.seq);
    }
}

/// Bounded single-consumer bus for tap blocks.
pub struct PcmBus {
    sender: PcmBusSender,
    receiver: Option<PcmBusReceiver>,
}

impl PcmBus {
    pub fn new() -> Self {
        Self::with_config(PcmBusConfig::default())
    }

    pub fn with_config(config: PcmBusConfig) -> Self {
        let capacity = config.channel_capacity();
        let (tx, rx) = mpsc::channel(capacity);

        tracing::debug!(
            capacity_ms = config.capacity_ms,
            blocks = capacity,
            block_ms = config.block_ms,
            "Created PCM bus"
        );

        Self {
            sender: PcmBusSender {
                tx,
                seq_counter: Arc::new(AtomicU64::new(0)),
                dropped_chunks: Arc::new(AtomicU64::new(0)),
            },
            receiver: Some(PcmBusReceiver {
                rx,
                last_seq: None,
                gaps_detected: 0,
            }),
        }
    }

    pub fn sender(&self) -> PcmBusSender {
        self.sender.clone()
    }

    /// Take the receiver (can only be called once).
    pub fn take_receiver(&mut self) -> Option<PcmBusReceiver> {
        self.receiver.take()
    }
}

impl Default for PcmBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_duration() {
        let chunk = PcmChunk::new(0, 0, 48_000, vec![0.0; 960]);
        assert_eq!(chunk.duration_ms(), 20);
        assert_eq!(PcmChunk::new(0, 0, 0, vec![0.0; 10]).duration_ms(), 0);
    }

    #[test]
    fn test_config_capacity() {
        let config = PcmBusConfig {
            capacity_ms: 1000,
            block_ms: 20,
        };
        assert_eq!(config.channel_capacity(), 50);

        let tiny = PcmBusConfig {
            capacity_ms: 10,
            block_ms: 20,
        };
        assert_eq!(tiny.channel_capacity(), 8);
    }

    #[tokio::test]
    async fn test_send_recv() {
        let mut bus = PcmBus::new();
        let sender = bus.sender();
        let mut receiver = bus.take_receiver().unwrap();

        assert!(sender.send(1000, 48_000, vec![0.25; 960]));

        let chunk = receiver.recv().await.unwrap();
        assert_eq!(chunk.seq, 0);
        assert_eq!(chunk.ts_ms, 1000);
        assert_eq!(chunk.samples.len(), 960);
    }

    #[test]
    fn test_full_bus_drops_instead_of_blocking() {
        let mut bus = PcmBus::with_config(PcmBusConfig {
            capacity_ms: 100,
            block_ms: 20,
        });
        let sender = bus.sender();
        let _receiver = bus.take_receiver().unwrap();

        for i in 0..20 {
            sender.send(i * 20, 48_000, vec![0.0; 960]);
        }

        assert_eq!(sender.dropped_chunks(), 12);
    }

    #[test]
    fn test_gap_detection_counts_dropped_sequences() {
        let mut bus = PcmBus::with_config(PcmBusConfig {
            capacity_ms: 160,
            block_ms: 20,
        });
        let sender = bus.sender();
        let mut receiver = bus.take_receiver().unwrap();

        // Capacity is 8 blocks: seq 8 and 9 are dropped.
        for i in 0..10 {
            sender.send(i * 20, 48_000, vec![0.0; 960]);
        }
        while receiver.try_recv().is_some() {}
        assert_eq!(receiver.gaps_detected(), 0);

        sender.send(200, 48_000, vec![0.0; 960]);
        let chunk = receiver.try_recv().unwrap();
        assert_eq!(chunk.seq, 10);
        assert_eq!(receiver.gaps_detected(), 2);
    }

    #[test]
    fn test_first_chunk_never_counts_as_gap() {
        let mut bus = PcmBus::new();
        let sender = bus.sender();
        let mut receiver = bus.take_receiver().unwrap();

        sender.send(0, 48_000, vec![0.0; 10]);
        sender.send(20, 48_000, vec![0.0; 10]);
        receiver.try_recv().unwrap();
        receiver.try_recv().unwrap();
        assert_eq!(receiver.gaps_detected(), 0);
    }

    #[test]
    fn test_send_after_receiver_dropped() {
        let mut bus = PcmBus::new();
        let sender = bus.sender();
        drop(bus.take_receiver());

        assert!(sender.is_closed());
        assert!(!sender.send(0, 48_000, vec![0.0; 10]));
        assert_eq!(sender.dropped_chunks(), 0);
    }
}
