//! Screen-share presenter arbitration and datagram routing (spec §4.6). A
//! single presenter holds the floor at a time; only its screen datagrams
//! are fanned out, to every other bound screen-plane subscriber.

use std::net::SocketAddr;

use bytes::Bytes;
use control::{ClientId, Plane, Registry};
use parking_lot::RwLock;

use crate::video::DropReason;

pub const DEFAULT_MAX_SCREEN_DATAGRAM: usize = 64 * 1024;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PresenterState {
    Idle,
    Granted(ClientId),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestOutcome {
    GrantedNew,
    GrantedAlready,
    Denied,
}

/// Presenter floor: `idle` or `granted(id)`, transitioned only by REQUEST,
/// RELEASE, the presenter's control connection closing, or the presenter
/// being removed from the roster.
pub struct PresenterArbiter {
    state: RwLock<PresenterState>,
}

impl Default for PresenterArbiter {
    fn default() -> Self {
        Self::new()
    }
}

impl PresenterArbiter {
    pub fn new() -> Self {
        Self { state: RwLock::new(PresenterState::Idle) }
    }

    pub fn current(&self) -> Option<ClientId> {
        match *self.state.read() {
            PresenterState::Granted(id) => Some(id),
            PresenterState::Idle => None,
        }
    }

    /// `REQUEST` (spec §4.6). Idempotent for the current presenter
    /// re-requesting (no state change, no event); denied if someone else
    /// already holds the floor.
    pub fn request(&self, id: ClientId) -> RequestOutcome {
        let mut state = self.state.write();
        match *state {
            PresenterState::Idle => {
                *state = PresenterState::Granted(id);
                RequestOutcome::GrantedNew
            }
            PresenterState::Granted(current) if current == id => RequestOutcome::GrantedAlready,
            PresenterState::Granted(_) => RequestOutcome::Denied,
        }
    }

    /// `RELEASE` (spec §4.6). Only the current presenter may release; a
    /// release from anyone else is a no-op.
    pub fn release(&self, id: ClientId) -> bool {
        let mut state = self.state.write();
        if *state == PresenterState::Granted(id) {
            *state = PresenterState::Idle;
            true
        } else {
            false
        }
    }

    /// Forces the floor back to idle if `id` currently holds it; used when
    /// the presenter's control connection closes or it's removed from the
    /// roster (spec §4.6).
    pub fn vacate_if_presenter(&self, id: ClientId) -> bool {
        self.release(id)
    }
}

#[derive(Debug)]
pub enum ScreenRouteOutcome {
    Forwarded { targets: Vec<SocketAddr> },
    Dropped(DropReason),
    Oversized,
    NotPresenter,
}

#[derive(Default)]
pub struct ScreenRouter {
    max_datagram: usize,
}

impl ScreenRouter {
    pub fn new(max_datagram: usize) -> Self {
        Self { max_datagram }
    }

    /// Resolves `src` against the screen plane exactly like the video
    /// router, then additionally gates forwarding on whether the resolved
    /// sender currently holds the presenter floor.
    pub fn route(
        &self,
        registry: &Registry,
        arbiter: &PresenterArbiter,
        src: SocketAddr,
        data: &Bytes,
    ) -> ScreenRouteOutcome {
        if data.len() > self.max_datagram {
            return ScreenRouteOutcome::Oversized;
        }
        if data.len() < crate::video::PUBLISHER_ID_LEN {
            return ScreenRouteOutcome::Dropped(DropReason::Malformed);
        }
        let raw = u32::from_be_bytes(data[0..crate::video::PUBLISHER_ID_LEN].try_into().unwrap());
        let claimed = ClientId(raw);

        if !registry.contains(claimed) {
            return ScreenRouteOutcome::Dropped(DropReason::NotBound);
        }

        match registry.resolve_by_datagram(Plane::Screen, src) {
            Some(owner) if owner == claimed => {
                registry.touch(claimed, Plane::Screen);
            }
            Some(_) => return ScreenRouteOutcome::Dropped(DropReason::Spoofed),
            None => {
                if !registry.bind_datagram(claimed, Plane::Screen, src) {
                    return ScreenRouteOutcome::Dropped(DropReason::Spoofed);
                }
            }
        }

        if arbiter.current() != Some(claimed) {
            return ScreenRouteOutcome::NotPresenter;
        }

        let targets = registry
            .live_ids()
            .into_iter()
            .filter(|id| *id != claimed)
            .filter_map(|id| registry.endpoint(id, Plane::Screen))
            .collect();
        ScreenRouteOutcome::Forwarded { targets }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    fn frame(publisher: u32) -> Bytes {
        Bytes::from(publisher.to_be_bytes().to_vec())
    }

    #[test]
    fn request_grants_when_idle() {
        let arbiter = PresenterArbiter::new();
        let id = ClientId(1);
        assert_eq!(arbiter.request(id), RequestOutcome::GrantedNew);
        assert_eq!(arbiter.current(), Some(id));
    }

    #[test]
    fn request_denied_to_a_second_presenter() {
        let arbiter = PresenterArbiter::new();
        let a = ClientId(1);
        let b = ClientId(2);
        assert_eq!(arbiter.request(a), RequestOutcome::GrantedNew);
        assert_eq!(arbiter.request(b), RequestOutcome::Denied);
        assert_eq!(arbiter.current(), Some(a));
    }

    #[test]
    fn re_request_by_current_presenter_is_idempotent() {
        let arbiter = PresenterArbiter::new();
        let a = ClientId(1);
        assert_eq!(arbiter.request(a), RequestOutcome::GrantedNew);
        assert_eq!(arbiter.request(a), RequestOutcome::GrantedAlready);
    }

    #[test]
    fn release_by_non_presenter_is_a_no_op() {
        let arbiter = PresenterArbiter::new();
        let a = ClientId(1);
        let b = ClientId(2);
        arbiter.request(a);
        assert!(!arbiter.release(b));
        assert_eq!(arbiter.current(), Some(a));
    }

    #[test]
    fn removal_vacates_the_floor() {
        let arbiter = PresenterArbiter::new();
        let a = ClientId(1);
        arbiter.request(a);
        assert!(arbiter.vacate_if_presenter(a));
        assert_eq!(arbiter.current(), None);
    }

    #[test]
    fn non_presenter_frames_are_dropped() {
        let registry = Registry::new(10);
        let alice = registry.add("alice".into()).unwrap();
        let bob = registry.add("bob".into()).unwrap();
        let arbiter = PresenterArbiter::new();
        arbiter.request(bob);

        let router = ScreenRouter::new(DEFAULT_MAX_SCREEN_DATAGRAM);
        let outcome = router.route(&registry, &arbiter, addr(9000), &frame(alice.0));
        assert!(matches!(outcome, ScreenRouteOutcome::NotPresenter));
    }

    #[test]
    fn oversized_datagram_is_dropped() {
        let registry = Registry::new(10);
        let arbiter = PresenterArbiter::new();
        let router = ScreenRouter::new(4);
        let outcome = router.route(&registry, &arbiter, addr(9000), &Bytes::from(vec![0u8; 10]));
        assert!(matches!(outcome, ScreenRouteOutcome::Oversized));
    }
}
