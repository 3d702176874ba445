pub(crate) mod answer_channel;
pub(crate) mod autosave;
pub(crate) mod deadline_clock;
pub(crate) mod events;
pub(crate) mod reveal_gate;
pub(crate) mod session_backend;
pub(crate) mod session_engine;
pub(crate) mod submission_coordinator;
pub(crate) mod threshold_notifier;
