//! Time-windowed EPG caching: per-channel program windows, incremental
//! paging and current-program resolution

pub mod cache;
pub mod pager;
pub mod resolver;

pub use cache::ProgramWindowCache;
pub use pager::TimeWindowPager;
pub use resolver::CurrentProgramResolver;
