pub mod debounced_alarm;

pub use debounced_alarm::{AlarmStatus, DebouncedAlarm};
