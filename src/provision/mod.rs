//! Campaign provisioning.
//!
//! A [`Provisioner`] turns customer inputs into pool and remote-profile
//! operations; a [`FlowRegistry`] keeps one [`Flow`] per conversation and
//! expires abandoned ones.

mod flow;
mod provisioner;
mod registry;
mod reply;
mod validate;

pub use flow::{Flow, Holdings, Input, Step};
pub use provisioner::{ProvisionError, Provisioner};
pub use registry::{ConversationId, FlowRegistry, SweeperMessage};
pub use reply::{CancelReason, Prompt, Reply, Status, Summary};
pub use validate::{
    Category, ValidationError, validate_bio, validate_bot_name, validate_campaign_name,
    validate_channel,
};
