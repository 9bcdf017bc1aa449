pub mod config;
pub mod error;
pub mod model;
pub mod normalize;
pub mod pagination;
pub mod refresh;
pub mod session;
pub mod stats;
pub mod upstream;

#[cfg(test)]
mod testing;

pub use config::{Config, Environment};
pub use error::{ProxyError, ProxyResult};
pub use model::{
    CreateTicket, DashboardView, MapPoint, MapView, StatsSnapshot, Ticket, TicketPage,
    TicketPriority, TicketStatus, UpdateTicket,
};
pub use pagination::{paginate, ListQuery, PaginationMode};
pub use refresh::RefreshRetry;
pub use session::{CookieSettings, RequestSession, SessionIdentity, SessionStore};
pub use stats::TicketStats;
pub use upstream::{HttpUpstream, Upstream, UpstreamRequest, UpstreamResponse};
