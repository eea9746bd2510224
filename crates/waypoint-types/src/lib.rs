mod event;
mod plan;
mod provider;
mod session;
mod turn;

pub use event::*;
pub use plan::*;
pub use provider::*;
pub use session::*;
pub use turn::*;
