mod client;
mod oauth;

pub use client::{
    ApiErrorClass, DiskClient, DiskError, DiskInfo, Link, Resource, ResourceList, ResourceType,
};
pub use oauth::{OAuthClient, OAuthError, OAuthToken};
