pub mod allocator;
pub mod booking;
pub mod exceptions;
pub mod history;
pub mod inventory;
pub mod lifecycle;
pub mod notifications;
pub mod slot_generator;
pub mod templates;
