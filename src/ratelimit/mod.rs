//! Rate limit rules and the descriptor tree built from them.

mod builder;
mod descriptor;
mod rules;
mod secret;

pub use builder::{build_descriptors, DescriptorSet};
pub use descriptor::{Descriptor, LimitPolicy, AUTH_KEY, PATH_KEY};
pub use rules::{CallerId, LimitUnit, RateLimitRule, RuleId, UnknownUnit};
pub use secret::{Secret, FINGERPRINT_LEN};
