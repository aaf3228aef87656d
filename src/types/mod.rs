pub mod alert;
pub mod asset;
pub mod job;
pub mod observation;
pub mod score;
pub mod ws;

pub use alert::*;
pub use asset::*;
pub use job::*;
pub use observation::*;
pub use score::*;
pub use ws::*;
