//! USB transport seam.
//!
//! The encoder never talks to libusb directly. Everything that leaves the
//! host goes through [`Transport`]: vendor control requests (both
//! directions of a control transfer) and bulk writes of finished command
//! buffers. [`CaptureTransport`] is a host-only implementation that
//! records traffic, used by the CLI to write streams to disk and by tests.

use std::io::Write;
use std::time::Duration;

use tracing::debug;

use crate::error::TransportError;

// ── Transport ────────────────────────────────────────────────────

/// Blocking access to one opened adapter.
///
/// Every call blocks until the device acknowledges or `timeout` elapses.
/// Implementations must not retry; retry policy belongs to the caller.
pub trait Transport {
    /// Vendor control transfer, device-to-host. Returns bytes read into `data`.
    fn control_in(
        &mut self,
        request: u8,
        value: u16,
        index: u16,
        data: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, TransportError>;

    /// Vendor control transfer, host-to-device. Returns bytes written.
    fn control_out(
        &mut self,
        request: u8,
        value: u16,
        index: u16,
        data: &[u8],
        timeout: Duration,
    ) -> Result<usize, TransportError>;

    /// Bulk write to `endpoint`. Returns bytes written.
    fn bulk_write(
        &mut self,
        endpoint: u8,
        data: &[u8],
        timeout: Duration,
    ) -> Result<usize, TransportError>;
}

/// Locates and opens adapters.
pub trait DeviceProvider {
    type Device: Transport;

    /// Open the first device matching `vendor:product` and claim `interface`.
    fn get_device(
        &self,
        vendor: u16,
        product: u16,
        interface: u8,
    ) -> Result<Self::Device, TransportError>;
}

impl<T: Transport + ?Sized> Transport for &mut T {
    fn control_in(
        &mut self,
        request: u8,
        value: u16,
        index: u16,
        data: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, TransportError> {
        (**self).control_in(request, value, index, data, timeout)
    }

    fn control_out(
        &mut self,
        request: u8,
        value: u16,
        index: u16,
        data: &[u8],
        timeout: Duration,
    ) -> Result<usize, TransportError> {
        (**self).control_out(request, value, index, data, timeout)
    }

    fn bulk_write(
        &mut self,
        endpoint: u8,
        data: &[u8],
        timeout: Duration,
    ) -> Result<usize, TransportError> {
        (**self).bulk_write(endpoint, data, timeout)
    }
}

// ── CaptureTransport ─────────────────────────────────────────────

/// Direction of a recorded control transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    In,
    Out,
}

/// One control transfer seen by a [`CaptureTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlRecord {
    pub direction: Direction,
    pub request: u8,
    pub value: u16,
    pub index: u16,
    /// Payload sent (OUT) or length requested (IN, zero-filled).
    pub data: Vec<u8>,
}

/// Records traffic instead of talking to hardware.
///
/// Bulk payloads are appended to `sink` in order. Control reads are
/// answered from a scripted queue of responses, falling back to zeros.
#[derive(Debug)]
pub struct CaptureTransport<W: Write> {
    sink: W,
    controls: Vec<ControlRecord>,
    responses: Vec<Vec<u8>>,
    bulk_transfers: usize,
    bytes_written: u64,
}

impl<W: Write> CaptureTransport<W> {
    pub fn new(sink: W) -> Self {
        Self {
            sink,
            controls: Vec::new(),
            responses: Vec::new(),
            bulk_transfers: 0,
            bytes_written: 0,
        }
    }

    /// Queue a reply for the next `control_in` call.
    pub fn push_response(&mut self, data: Vec<u8>) {
        self.responses.insert(0, data);
    }

    /// Control transfers seen so far.
    pub fn controls(&self) -> &[ControlRecord] {
        &self.controls
    }

    /// Number of bulk writes performed.
    pub fn bulk_transfers(&self) -> usize {
        self.bulk_transfers
    }

    /// Total bulk bytes written.
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    pub fn sink(&self) -> &W {
        &self.sink
    }

    pub fn into_sink(self) -> W {
        self.sink
    }
}

impl<W: Write> Transport for CaptureTransport<W> {
    fn control_in(
        &mut self,
        request: u8,
        value: u16,
        index: u16,
        data: &mut [u8],
        _timeout: Duration,
    ) -> Result<usize, TransportError> {
        data.fill(0);
        if let Some(reply) = self.responses.pop() {
            let n = reply.len().min(data.len());
            data[..n].copy_from_slice(&reply[..n]);
        }
        self.controls.push(ControlRecord {
            direction: Direction::In,
            request,
            value,
            index,
            data: vec![0; data.len()],
        });
        Ok(data.len())
    }

    fn control_out(
        &mut self,
        request: u8,
        value: u16,
        index: u16,
        data: &[u8],
        _timeout: Duration,
    ) -> Result<usize, TransportError> {
        debug!(request, value, index, len = data.len(), "captured control write");
        self.controls.push(ControlRecord {
            direction: Direction::Out,
            request,
            value,
            index,
            data: data.to_vec(),
        });
        Ok(data.len())
    }

    fn bulk_write(
        &mut self,
        _endpoint: u8,
        data: &[u8],
        _timeout: Duration,
    ) -> Result<usize, TransportError> {
        self.sink.write_all(data)?;
        self.bulk_transfers += 1;
        self.bytes_written += data.len() as u64;
        Ok(data.len())
    }
}
