//! Decide what an assertion means for the session.
//!
//! Given the mapped attributes, the resolver picks exactly one branch and
//! applies it to the session (and, for user-backed branches, the user
//! store). Session id rotation, the flash marker and the final redirect
//! belong to the caller.

use tracing::{debug, info, warn};

use super::{
    AuthError,
    attributes::MappedAttributes,
    session_store::BridgeSession,
    users::{CreateUser, User, UserStore},
};
use crate::config::ShibbolethConfig;

/// Credential stored on provisioned users. Never checked: the IdP is the
/// only way in.
pub const PLACEHOLDER_PASSWORD: &str = "shibboleth";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginBranch {
    /// The identifier attribute was missing or empty
    NoIdentifier,
    /// Attributes stored directly in the session
    SimpleSession,
    /// Matched an existing user, whose attributes were refreshed
    ExistingUser,
    /// Created a new user from the assertion
    Provisioned,
    /// Unknown user and provisioning disabled
    Rejected,
}

impl LoginBranch {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoginBranch::NoIdentifier => "no_identifier",
            LoginBranch::SimpleSession => "simple_session",
            LoginBranch::ExistingUser => "existing_user",
            LoginBranch::Provisioned => "provisioned",
            LoginBranch::Rejected => "rejected",
        }
    }
}

/// Pure branch selection. `user_exists` is ignored when it cannot matter.
pub fn select_branch(
    identifier_present: bool,
    simple_session: bool,
    user_exists: bool,
    auto_provision: bool,
) -> LoginBranch {
    match (identifier_present, simple_session, user_exists, auto_provision) {
        (false, ..) => LoginBranch::NoIdentifier,
        (true, true, ..) => LoginBranch::SimpleSession,
        (true, false, true, _) => LoginBranch::ExistingUser,
        (true, false, false, true) => LoginBranch::Provisioned,
        (true, false, false, false) => LoginBranch::Rejected,
    }
}

/// Outcome of a successful resolution.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub branch: LoginBranch,
    /// User record for `ExistingUser` and `Provisioned`
    pub user: Option<User>,
}

/// Apply an assertion to `session`.
///
/// Returns `AuthError::Unauthorized` for the rejected branch. The session
/// is left untouched in that case and for `NoIdentifier`.
pub async fn resolve(
    config: &ShibbolethConfig,
    attributes: MappedAttributes,
    entitlement: Option<String>,
    session: &mut BridgeSession,
    users: &dyn UserStore,
) -> Result<Resolution, AuthError> {
    let identifier = attributes
        .get(&config.identifier)
        .filter(|v| !v.is_empty())
        .cloned();

    // The user store only decides the branch for user-backed sessions
    let existing = match &identifier {
        Some(value) if !config.use_simple_session => {
            users.find_by_field(&config.identifier, value).await?
        }
        _ => None,
    };

    let branch = select_branch(
        identifier.is_some(),
        config.use_simple_session,
        existing.is_some(),
        config.add_new_users,
    );
    let shown = identifier.as_deref().unwrap_or_default();

    let user = match (branch, existing) {
        (LoginBranch::NoIdentifier, _) => {
            debug!(field = %config.identifier, "Assertion carried no identifier");
            return Ok(Resolution { branch, user: None });
        }
        (LoginBranch::SimpleSession, _) => {
            let mut attributes = attributes;
            attributes.insert(config.entitlement.clone(), entitlement.unwrap_or_default());
            info!(identifier = %shown, "Stored asserted attributes in session");

            session.attributes = Some(attributes);
            session.user_id = None;
            session.identifier = identifier;
            return Ok(Resolution { branch, user: None });
        }
        (LoginBranch::ExistingUser, Some(user)) => {
            let user = users.update_attributes(user.id, attributes).await?;
            info!(user_id = %user.id, identifier = %shown, "Refreshed existing user from assertion");
            user
        }
        (LoginBranch::Provisioned, _) => {
            let user = users
                .create(CreateUser {
                    attributes,
                    password: PLACEHOLDER_PASSWORD.to_string(),
                })
                .await?;
            info!(user_id = %user.id, identifier = %shown, "Provisioned new user from assertion");
            user
        }
        (LoginBranch::Rejected, _) | (LoginBranch::ExistingUser, None) => {
            warn!(identifier = %shown, "Rejected login for unknown user, provisioning disabled");
            return Err(AuthError::Unauthorized);
        }
    };

    session.user_id = Some(user.id);
    session.attributes = None;
    session.identifier = identifier;

    Ok(Resolution {
        branch,
        user: Some(user),
    })
}
