pub(crate) mod classifier;
pub(crate) mod deadlines;
pub(crate) mod delivery;
pub(crate) mod ingestor;
pub(crate) mod messages;
pub(crate) mod progress;
pub(crate) mod reminders;
pub(crate) mod resolution;
pub(crate) mod telegram;
pub(crate) mod transport;
