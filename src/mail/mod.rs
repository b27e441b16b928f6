//! Mail capture pipeline: accumulate, filter, persist, broadcast

pub mod accumulator;
pub mod broadcast;
pub mod email;
pub mod relay;
pub mod saver;

pub use accumulator::{AccumulatorFactory, RecipientsAccumulator};
pub use broadcast::{Broadcast, RecvError, RecvTimeoutError, Subscription, TryRecvError};
pub use email::Email;
pub use relay::RelayDomains;
pub use saver::{MailIndex, MailSaver, SaverConfig, SaverGuard};
