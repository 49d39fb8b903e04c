//! Capture source capability.
//!
//! A [`PacketSource`] opens one [`CaptureDevice`] per interface. Devices are
//! blocking readers; the coordinator pumps each of them from its own blocking
//! task into the shared packet channel.
//!
//! The libpcap backend is compiled in with the `pcap` cargo feature.

use crate::error_handling::types::CaptureError;
use crate::network::filter_builder::FilterExpression;
use crate::network::types::LinkKind;

/// One opened interface.
pub trait CaptureDevice: Send + 'static {
    /// Blocks until the next frame or the read timeout.
    ///
    /// `Ok(None)` means the timeout elapsed, `Err(CaptureError::SourceClosed)`
    /// that no more packets will come.
    fn next_packet(&mut self) -> Result<Option<(LinkKind, Vec<u8>)>, CaptureError>;
}

pub trait PacketSource {
    /// Opens `interface` with `filter` applied. Failing here is fatal for the caller.
    fn open(
        &self,
        interface: &str,
        filter: &FilterExpression,
        buffer_size: Option<i32>,
    ) -> Result<Box<dyn CaptureDevice>, CaptureError>;
}

/// Stand-in used when the binary is built without a capture backend.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnsupportedSource;

impl PacketSource for UnsupportedSource {
    fn open(
        &self,
        interface: &str,
        _filter: &FilterExpression,
        _buffer_size: Option<i32>,
    ) -> Result<Box<dyn CaptureDevice>, CaptureError> {
        Err(CaptureError::Unsupported(format!(
            "cannot open '{}', rebuild with `--features pcap` for live capture",
            interface
        )))
    }
}

#[cfg(feature = "pcap")]
pub use live::PcapSource;

/// The capture backend this binary was built with.
pub fn default_source() -> Box<dyn PacketSource> {
    #[cfg(feature = "pcap")]
    {
        Box::new(live::PcapSource)
    }
    #[cfg(not(feature = "pcap"))]
    {
        Box::new(UnsupportedSource)
    }
}

#[cfg(feature = "pcap")]
mod live {
    use log::debug;
    use pcap::{Active, Capture, Linktype};

    use super::{CaptureDevice, PacketSource};
    use crate::error_handling::types::CaptureError;
    use crate::network::filter_builder::FilterExpression;
    use crate::network::types::LinkKind;

    const SNAPLEN: i32 = 65535;
    // Bounds how long a pump takes to notice shutdown
    const READ_TIMEOUT_MS: i32 = 100;

    /// libpcap-backed capture, one live handle per interface.
    #[derive(Debug, Default, Clone, Copy)]
    pub struct PcapSource;

    impl PacketSource for PcapSource {
        fn open(
            &self,
            interface: &str,
            filter: &FilterExpression,
            buffer_size: Option<i32>,
        ) -> Result<Box<dyn CaptureDevice>, CaptureError> {
            let open_error = |e: pcap::Error| CaptureError::InterfaceOpen {
                interface: interface.to_string(),
                reason: e.to_string(),
            };

            let mut inactive = Capture::from_device(interface)
                .map_err(open_error)?
                .promisc(true)
                .snaplen(SNAPLEN)
                .immediate_mode(true)
                .timeout(READ_TIMEOUT_MS);
            if let Some(size) = buffer_size {
                inactive = inactive.buffer_size(size);
            }
            let mut capture = inactive.open().map_err(open_error)?;

            capture
                .filter(filter.as_str(), true)
                .map_err(|e| CaptureError::InvalidFilter {
                    interface: interface.to_string(),
                    filter: filter.to_string(),
                    reason: e.to_string(),
                })?;

            let linktype = capture.get_datalink();
            let (link, header_len) =
                link_layout(linktype).ok_or_else(|| CaptureError::InterfaceOpen {
                    interface: interface.to_string(),
                    reason: format!("unsupported link type {:?}", linktype),
                })?;
            debug!(
                "Opened {} (link type {:?}, {} byte link header)",
                interface, linktype, header_len
            );

            Ok(Box::new(PcapDevice {
                capture,
                link,
                header_len,
            }))
        }
    }

    /// Where the network layer starts for the link types we understand.
    fn link_layout(linktype: Linktype) -> Option<(LinkKind, usize)> {
        match linktype.0 {
            // EN10MB
            1 => Some((LinkKind::Ethernet, 0)),
            // NULL, LOOP: 4 byte address family
            0 | 108 => Some((LinkKind::Ip, 4)),
            // RAW, IPV4, IPV6
            12 | 101 | 228 | 229 => Some((LinkKind::Ip, 0)),
            // LINUX_SLL ("any" device)
            113 => Some((LinkKind::Ip, 16)),
            // LINUX_SLL2
            276 => Some((LinkKind::Ip, 20)),
            _ => None,
        }
    }

    struct PcapDevice {
        capture: Capture<Active>,
        link: LinkKind,
        header_len: usize,
    }

    impl CaptureDevice for PcapDevice {
        fn next_packet(&mut self) -> Result<Option<(LinkKind, Vec<u8>)>, CaptureError> {
            match self.capture.next_packet() {
                Ok(packet) => Ok(packet
                    .data
                    .get(self.header_len..)
                    .map(|data| (self.link, data.to_vec()))),
                Err(pcap::Error::TimeoutExpired) => Ok(None),
                Err(pcap::Error::NoMorePackets) => Err(CaptureError::SourceClosed),
                Err(e) => Err(CaptureError::ReadFailed(e.to_string())),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::filter_builder::build;

    #[test]
    fn test_unsupported_source_names_the_interface() {
        let filter = build("tcp", &[], 4040);
        match UnsupportedSource.open("eth9", &filter, None) {
            Err(CaptureError::Unsupported(msg)) => assert!(msg.contains("eth9")),
            Err(e) => panic!("unexpected error {}", e),
            Ok(_) => panic!("unsupported source opened a device"),
        }
    }
}
