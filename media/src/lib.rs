pub mod audio;
pub mod screen;
pub mod video;

pub use audio::{AudioMixer, MixTick};
pub use screen::{PresenterArbiter, PresenterState, RequestOutcome, ScreenRouteOutcome, ScreenRouter};
pub use video::{DropReason, RouteOutcome, VideoRouter};
