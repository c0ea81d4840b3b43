//! The ACM student chapter's membership site: accounts, SIGs, events and
//! paid memberships, served as HTML pages and a GraphQL API.

pub mod config;
pub mod db;
pub mod error;
pub mod gateway;
pub mod graphql;
pub mod models;
pub mod oauth;
pub mod outcome;
pub mod routes;
pub mod state;
pub mod templates;
pub mod util;
