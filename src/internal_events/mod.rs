pub mod http_client;
mod prelude;
mod timeplus;

pub(crate) use self::prelude::{error_stage, error_type};
pub use self::timeplus::*;

pub trait InternalEvent: Sized {
    fn emit(self);
}

pub fn emit(event: impl InternalEvent) {
    event.emit();
}

#[macro_export]
macro_rules! emit {
    ($event:expr) => {
        $crate::internal_events::emit($event)
    };
}
