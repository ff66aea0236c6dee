//! Input channels feeding the engine one buffer per cycle.
//!
//! - [`SampleSource`]: the "next available buffer" primitive; never blocks
//! - [`InputPorts`]: ordered set of sources polled once per cycle
//! - [`sample_channel`]: queue-backed source plus its producer handle
//! - [`spawn_reader`]: byte stream (file, stdin) decoded into typed buffers

use std::collections::HashMap;
use std::io::Read;

use tokio::sync::mpsc::{self, error::TryRecvError};

use crate::config;
use crate::core::{ElementType, SampleBuffer, Samples};
use crate::error::{Result, SinkError};

/// Non-blocking supplier of sample buffers.
pub trait SampleSource: Send {
    fn element_type(&self) -> ElementType;

    /// Next buffer if one is ready.
    fn next_buffer(&mut self) -> Option<SampleBuffer>;

    /// True once the source can never produce data again.
    fn is_finished(&self) -> bool {
        false
    }
}

/// Producer side of a [`ChannelSource`].
#[derive(Debug, Clone)]
pub struct SampleSender {
    element: ElementType,
    tx: mpsc::UnboundedSender<SampleBuffer>,
}

impl SampleSender {
    pub fn element_type(&self) -> ElementType {
        self.element
    }

    /// Queue a buffer. Its element type must match the channel's.
    pub fn send(&self, buffer: SampleBuffer) -> Result<()> {
        if buffer.element_type() != self.element {
            return Err(SinkError::InvalidInput(format!(
                "{} buffer sent on {} channel",
                buffer.element_type(),
                self.element
            )));
        }
        self.tx
            .send(buffer)
            .map_err(|_| SinkError::Io(format!("{} input channel closed", self.element)))
    }
}

/// Queue-backed [`SampleSource`].
#[derive(Debug)]
pub struct ChannelSource {
    element: ElementType,
    rx: mpsc::UnboundedReceiver<SampleBuffer>,
    finished: bool,
}

impl SampleSource for ChannelSource {
    fn element_type(&self) -> ElementType {
        self.element
    }

    fn next_buffer(&mut self) -> Option<SampleBuffer> {
        match self.rx.try_recv() {
            Ok(buffer) => Some(buffer),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => {
                self.finished = true;
                None
            }
        }
    }

    fn is_finished(&self) -> bool {
        self.finished
    }
}

/// Create a typed queue: buffers sent on the [`SampleSender`] come out of the
/// [`ChannelSource`] in order.
pub fn sample_channel(element: ElementType) -> (SampleSender, ChannelSource) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        SampleSender { element, tx },
        ChannelSource {
            element,
            rx,
            finished: false,
        },
    )
}

/// Decode a byte stream into `element` buffers on a background thread.
///
/// Each read of up to [`config::READ_CHUNK_BYTES`] becomes one buffer; bytes
/// that do not complete an element wait for the next read. The source
/// finishes at end of stream or on a read error.
pub fn spawn_reader<R>(element: ElementType, mut reader: R) -> Result<ChannelSource>
where
    R: Read + Send + 'static,
{
    let (sender, source) = sample_channel(element);

    std::thread::Builder::new()
        .name(format!("{element}-reader"))
        .spawn(move || {
            let size = element.size();
            let mut chunk = vec![0u8; config::READ_CHUNK_BYTES];
            let mut pending: Vec<u8> = Vec::new();
            loop {
                let n = match reader.read(&mut chunk) {
                    Ok(0) => break,
                    Ok(n) => n,
                    Err(ref e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                    Err(e) => {
                        tracing::warn!("Input read failed: {e}");
                        break;
                    }
                };
                pending.extend_from_slice(&chunk[..n]);
                let whole = pending.len() - pending.len() % size;
                if whole == 0 {
                    continue;
                }
                let rest = pending.split_off(whole);
                let samples = Samples::from_ne_bytes(element, &pending);
                pending = rest;
                if sender.send(SampleBuffer::new(samples)).is_err() {
                    break;
                }
            }
            if !pending.is_empty() {
                tracing::warn!(
                    "Discarding {} trailing bytes that do not form a whole {element} element",
                    pending.len()
                );
            }
            tracing::debug!("{element} input reached end of stream");
        })
        .map_err(|e| SinkError::Io(format!("failed to spawn input reader: {e}")))?;

    Ok(source)
}

/// Ordered input channels. At most one is expected to produce data per cycle.
#[derive(Default)]
pub struct InputPorts {
    sources: Vec<Box<dyn SampleSource>>,
}

impl InputPorts {
    pub fn new() -> Self {
        Self::default()
    }

    /// One channel per element type, in [`ElementType::ALL`] order.
    pub fn typed_channels() -> (Self, HashMap<ElementType, SampleSender>) {
        let mut ports = Self::new();
        let mut senders = HashMap::new();
        for element in ElementType::ALL {
            let (tx, rx) = sample_channel(element);
            ports.add(Box::new(rx));
            senders.insert(element, tx);
        }
        (ports, senders)
    }

    pub fn add(&mut self, source: Box<dyn SampleSource>) {
        self.sources.push(source);
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Poll every channel once and return the first buffer found.
    ///
    /// Buffers produced by later channels in the same cycle are dropped with
    /// a warning rather than delivered twice.
    pub fn next_cycle(&mut self) -> Option<SampleBuffer> {
        let mut first: Option<SampleBuffer> = None;
        let mut producing = 0usize;

        for source in &mut self.sources {
            if let Some(buffer) = source.next_buffer() {
                producing += 1;
                if first.is_none() {
                    first = Some(buffer);
                } else {
                    tracing::debug!("Dropping {} buffer from a second active port", buffer.element_type());
                }
            }
        }

        if producing > 1 {
            tracing::warn!("More than one data port received data ({producing} ports)");
        }
        first
    }

    /// True when every channel has finished.
    pub fn is_exhausted(&self) -> bool {
        !self.sources.is_empty() && self.sources.iter().all(|s| s.is_finished())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::time::{Duration, Instant};

    fn drain(source: &mut ChannelSource) -> Vec<SampleBuffer> {
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut out = Vec::new();
        while !source.is_finished() && Instant::now() < deadline {
            match source.next_buffer() {
                Some(b) => out.push(b),
                None => std::thread::sleep(Duration::from_millis(1)),
            }
        }
        out
    }

    #[test]
    fn test_channel_delivers_in_order() {
        let (tx, mut rx) = sample_channel(ElementType::Short);
        tx.send(vec![1i16].into()).unwrap();
        tx.send(vec![2i16].into()).unwrap();
        assert_eq!(rx.next_buffer().unwrap().samples, Samples::Short(vec![1]));
        assert_eq!(rx.next_buffer().unwrap().samples, Samples::Short(vec![2]));
        assert!(rx.next_buffer().is_none());
        assert!(!rx.is_finished());
    }

    #[test]
    fn test_channel_rejects_wrong_element_type() {
        let (tx, _rx) = sample_channel(ElementType::Short);
        let err = tx.send(vec![1.0f32].into()).unwrap_err();
        assert_eq!(err.kind(), "InvalidInput");
    }

    #[test]
    fn test_channel_finishes_when_sender_dropped() {
        let (tx, mut rx) = sample_channel(ElementType::Octet);
        tx.send(vec![1u8].into()).unwrap();
        drop(tx);
        assert!(rx.next_buffer().is_some());
        assert!(rx.next_buffer().is_none());
        assert!(rx.is_finished());
    }

    #[test]
    fn test_next_cycle_returns_first_producing_port() {
        let (mut ports, senders) = InputPorts::typed_channels();
        assert_eq!(ports.len(), 8);
        assert!(ports.next_cycle().is_none());

        senders[&ElementType::Float].send(vec![1.0f32].into()).unwrap();
        let buffer = ports.next_cycle().unwrap();
        assert_eq!(buffer.element_type(), ElementType::Float);
        assert!(ports.next_cycle().is_none());
    }

    #[test]
    fn test_next_cycle_drops_second_port_data() {
        let (mut ports, senders) = InputPorts::typed_channels();
        senders[&ElementType::Double].send(vec![2.0f64].into()).unwrap();
        senders[&ElementType::Short].send(vec![7i16].into()).unwrap();

        // Short is polled before double; the double buffer is consumed and dropped.
        let buffer = ports.next_cycle().unwrap();
        assert_eq!(buffer.samples, Samples::Short(vec![7]));
        assert!(ports.next_cycle().is_none());
    }

    #[test]
    fn test_reader_decodes_whole_elements() {
        let mut bytes = Vec::new();
        for v in [1u32, 2, 3] {
            bytes.extend_from_slice(&v.to_ne_bytes());
        }
        bytes.push(0xFF);

        let mut source = spawn_reader(ElementType::Ulong, Cursor::new(bytes)).unwrap();
        let buffers = drain(&mut source);
        assert!(source.is_finished());

        let values: Vec<u32> = buffers
            .into_iter()
            .flat_map(|b| match b.samples {
                Samples::Ulong(v) => v,
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(values, vec![1, 2, 3]);
    }

    #[test]
    fn test_exhausted_only_when_all_sources_finish() {
        let mut ports = InputPorts::new();
        assert!(!ports.is_exhausted());

        let (tx_a, rx_a) = sample_channel(ElementType::Octet);
        let (tx_b, rx_b) = sample_channel(ElementType::Char);
        ports.add(Box::new(rx_a));
        ports.add(Box::new(rx_b));

        drop(tx_a);
        ports.next_cycle();
        assert!(!ports.is_exhausted());

        drop(tx_b);
        ports.next_cycle();
        assert!(ports.is_exhausted());
    }
}
