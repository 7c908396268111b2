pub mod attributes;
mod error;
pub mod redirect;
pub mod resolver;
pub mod session_store;
mod source;
#[cfg(feature = "jwt")]
pub mod token;
pub mod users;

pub use attributes::{MappedAttributes, ServerVariables, VariableSource, map_attributes};
pub use error::{AuthError, ErrorResponse};
pub use redirect::RedirectPolicy;
pub use resolver::{LoginBranch, Resolution, resolve, select_branch};
pub use session_store::{BridgeSession, MemorySessionStore, SessionStore};
pub use source::{IdentitySource, Variables};
#[cfg(feature = "jwt")]
pub use token::{TokenError, TokenIssuer};
pub use users::{MemoryUserStore, User, UserStore, UserStoreError};
