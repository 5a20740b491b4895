//! Group membership check performed before talking to the daemon

use nix::unistd::{Gid, Group, Uid, User};
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum AuthorizationError {
    #[error("Group '{0}' does not exist")]
    GroupNotFound(String),
    #[error("User {user} is not a member of group '{group}'")]
    NotMember { user: String, group: String },
    #[error("Failed to look up user or group: {0}")]
    Lookup(#[from] nix::errno::Errno),
}

/// Ensure the real user of this process belongs to `group_name`
///
/// Membership means either the group is the user's primary group or the
/// user is listed as a member of it.
pub fn authorize_current_user(group_name: &str) -> Result<(), AuthorizationError> {
    let group = Group::from_name(group_name)?
        .ok_or_else(|| AuthorizationError::GroupNotFound(group_name.to_string()))?;

    let uid = Uid::current();
    let user = User::from_uid(uid)?;
    let user_name = user
        .as_ref()
        .map(|u| u.name.clone())
        .unwrap_or_else(|| uid.to_string());

    let primary_gid = user.as_ref().map(|u| u.gid).unwrap_or_else(Gid::current);
    if is_member(group.gid, &group.mem, &user_name, primary_gid) {
        debug!("User {} authorized through group {}", user_name, group.name);
        Ok(())
    } else {
        Err(AuthorizationError::NotMember {
            user: user_name,
            group: group.name,
        })
    }
}

fn is_member(group_gid: Gid, members: &[String], user_name: &str, primary_gid: Gid) -> bool {
    group_gid == primary_gid || members.iter().any(|member| member == user_name)
}
