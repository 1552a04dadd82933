//! In-process signalling state: live session registry and admission
//! policy.

pub mod policy;
pub mod room_registry;

#[doc(inline)]
pub use self::room_registry::RoomRegistry;
