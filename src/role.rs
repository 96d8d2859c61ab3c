//! The five endpoint roles and their wire-level (`axon_type`) counterparts.

use std::str::FromStr;

use crate::error::MeshlinkError;

/// The role an endpoint was created with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Pub,
    Sub,
    Req,
    Rep,
    Mon,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Pub => "pub",
            Role::Sub => "sub",
            Role::Req => "req",
            Role::Rep => "rep",
            Role::Mon => "mon",
        }
    }

    /// The `axon_type` this role advertises on the wire. `None` for Monitor,
    /// which has no transport of its own.
    pub fn axon_role(&self) -> Option<AxonRole> {
        match self {
            Role::Pub => Some(AxonRole::PubEmitter),
            Role::Sub => Some(AxonRole::SubEmitter),
            Role::Req => Some(AxonRole::Req),
            Role::Rep => Some(AxonRole::Rep),
            Role::Mon => None,
        }
    }

    /// PUB and REP own a local TCP listener bound on Start.
    pub fn has_listener(&self) -> bool {
        matches!(self, Role::Pub | Role::Rep)
    }

    /// Every role except Monitor owns exactly one transport instance.
    pub fn has_transport(&self) -> bool {
        !matches!(self, Role::Mon)
    }
}

impl FromStr for Role {
    type Err = MeshlinkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pub" => Ok(Role::Pub),
            "sub" => Ok(Role::Sub),
            "req" => Ok(Role::Req),
            "rep" => Ok(Role::Rep),
            "mon" => Ok(Role::Mon),
            other => Err(MeshlinkError::InvalidArgument(format!(
                "unknown role '{other}', expected one of pub/sub/req/rep/mon"
            ))),
        }
    }
}

/// The wire-level transport behaviour an advertisement describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AxonRole {
    PubEmitter,
    SubEmitter,
    Req,
    Rep,
}

impl AxonRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            AxonRole::PubEmitter => "pub-emitter",
            AxonRole::SubEmitter => "sub-emitter",
            AxonRole::Req => "req",
            AxonRole::Rep => "rep",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pub-emitter" => Some(AxonRole::PubEmitter),
            "sub-emitter" => Some(AxonRole::SubEmitter),
            "req" => Some(AxonRole::Req),
            "rep" => Some(AxonRole::Rep),
            _ => None,
        }
    }

    /// The `axon_type` a remote peer must advertise to be a connection
    /// candidate for an endpoint advertising `self`.
    pub fn complement(&self) -> AxonRole {
        match self {
            AxonRole::PubEmitter => AxonRole::SubEmitter,
            AxonRole::SubEmitter => AxonRole::PubEmitter,
            AxonRole::Req => AxonRole::Rep,
            AxonRole::Rep => AxonRole::Req,
        }
    }
}
