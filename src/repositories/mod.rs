pub(crate) mod events;
pub(crate) mod notifications;
pub(crate) mod progress;
pub(crate) mod reference;
