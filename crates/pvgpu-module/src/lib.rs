//! # pvgpu-module - default PV transport implementations
//!
//! | Piece            | Type                                 |
//! |------------------|--------------------------------------|
//! | shared page      | `MmapSharedPage` / `PageView`        |
//! | command ring     | `CommandRing`                        |
//! | fence/reply      | `PvChannel`                          |
//! | negotiation      | `PvInstanceBuilder` -> `PvInstance`  |
//! | action encoders  | `PvActions`                          |
//! | op dispatch      | `PpgttDispatch`, `GgttDispatch`, `ContextDispatch` |
//! | test host        | `LoopbackHost`                       |

pub mod page;
pub mod command_ring;
pub mod channel;
pub mod config;
pub mod instance;
pub mod actions;
pub mod dispatch;
pub mod loopback;

pub use actions::PvActions;
pub use channel::PvChannel;
pub use command_ring::CommandRing;
pub use config::PvConfig;
pub use dispatch::{ContextDispatch, GgttDispatch, PpgttDispatch};
pub use instance::{PvInstance, PvInstanceBuilder};
pub use loopback::{HostMode, LoopbackHost};
pub use page::{MmapSharedPage, PageView};
