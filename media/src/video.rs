//! Video fan-out router (spec §4.4). Each datagram is framed as a 4-byte
//! big-endian publisher id followed by an opaque payload; the router's job
//! is purely to decide who a packet is from and who it should go to. The
//! actual `UdpSocket::send_to` calls (and their failure accounting) belong
//! to the caller, which is why this returns a routing decision rather than
//! performing I/O itself.

use std::net::SocketAddr;

use bytes::Bytes;
use control::{ClientId, Plane, Registry};

pub const PUBLISHER_ID_LEN: usize = 4;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DropReason {
    /// Shorter than the publisher-id prefix.
    Malformed,
    /// The claimed publisher id is not a live participant.
    NotBound,
    /// The source address is already owned by a different participant on
    /// this plane; the packet's claimed publisher id doesn't match.
    Spoofed,
}

#[derive(Debug)]
pub enum RouteOutcome {
    Forwarded { publisher_id: ClientId, targets: Vec<SocketAddr> },
    Dropped(DropReason),
}

#[derive(Default)]
pub struct VideoRouter;

impl VideoRouter {
    pub fn new() -> Self {
        Self
    }

    fn parse_publisher_id(data: &Bytes) -> Option<ClientId> {
        if data.len() < PUBLISHER_ID_LEN {
            return None;
        }
        let raw = u32::from_be_bytes(data[0..PUBLISHER_ID_LEN].try_into().unwrap());
        Some(ClientId(raw))
    }

    /// Resolves ownership of `src` on the video plane (binding it to the
    /// claimed publisher if this is its first observed packet, per spec
    /// §4.2), then fans the frame out unmodified to every other
    /// participant's bound video endpoint.
    pub fn route(&self, registry: &Registry, src: SocketAddr, data: &Bytes) -> RouteOutcome {
        let Some(claimed) = Self::parse_publisher_id(data) else {
            return RouteOutcome::Dropped(DropReason::Malformed);
        };

        if !registry.contains(claimed) {
            return RouteOutcome::Dropped(DropReason::NotBound);
        }

        match registry.resolve_by_datagram(Plane::Video, src) {
            Some(owner) if owner == claimed => {
                registry.touch(claimed, Plane::Video);
            }
            Some(_) => return RouteOutcome::Dropped(DropReason::Spoofed),
            None => {
                if !registry.bind_datagram(claimed, Plane::Video, src) {
                    return RouteOutcome::Dropped(DropReason::Spoofed);
                }
            }
        }

        let targets = registry
            .live_ids()
            .into_iter()
            .filter(|id| *id != claimed)
            .filter_map(|id| registry.endpoint(id, Plane::Video))
            .collect();

        RouteOutcome::Forwarded { publisher_id: claimed, targets }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    fn frame(publisher: u32, payload: &[u8]) -> Bytes {
        let mut buf = publisher.to_be_bytes().to_vec();
        buf.extend_from_slice(payload);
        Bytes::from(buf)
    }

    #[test]
    fn first_packet_binds_and_forwards_to_others() {
        let registry = Registry::new(10);
        let alice = registry.add("alice".into()).unwrap();
        let bob = registry.add("bob".into()).unwrap();
        registry.bind_datagram(bob, Plane::Video, addr(9100));

        let router = VideoRouter::new();
        let outcome = router.route(&registry, addr(9000), &frame(alice.0, b"frame"));

        match outcome {
            RouteOutcome::Forwarded { publisher_id, targets } => {
                assert_eq!(publisher_id, alice);
                assert_eq!(targets, vec![addr(9100)]);
            }
            other => panic!("expected forward, got {other:?}"),
        }
    }

    #[test]
    fn spoofed_address_is_dropped() {
        let registry = Registry::new(10);
        let alice = registry.add("alice".into()).unwrap();
        let bob = registry.add("bob".into()).unwrap();
        registry.bind_datagram(alice, Plane::Video, addr(9000));

        let router = VideoRouter::new();
        let outcome = router.route(&registry, addr(9000), &frame(bob.0, b"frame"));
        assert!(matches!(outcome, RouteOutcome::Dropped(DropReason::Spoofed)));
    }

    #[test]
    fn unknown_publisher_is_dropped() {
        let registry = Registry::new(10);
        let router = VideoRouter::new();
        let outcome = router.route(&registry, addr(9000), &frame(999, b"frame"));
        assert!(matches!(outcome, RouteOutcome::Dropped(DropReason::NotBound)));
    }

    #[test]
    fn short_packet_is_malformed() {
        let registry = Registry::new(10);
        let router = VideoRouter::new();
        let outcome = router.route(&registry, addr(9000), &Bytes::from_static(b"ab"));
        assert!(matches!(outcome, RouteOutcome::Dropped(DropReason::Malformed)));
    }
}
