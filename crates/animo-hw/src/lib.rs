pub mod doctor;
pub mod effector;
pub mod presence;

pub use effector::{open_effector, Effector, EffectorConfig, NoopEffector, SysfsPwmEffector};
pub use presence::{open_presence, AlwaysPresent, PresenceConfig, PresenceInput, SysfsGpioInput};
