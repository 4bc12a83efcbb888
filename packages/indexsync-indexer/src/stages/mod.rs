// Enrichment steps, in pipeline order
pub mod best_bet;
pub mod format;
pub mod links;
pub mod popularity;
pub mod self_link;

// Re-exports
pub use best_bet::BestBetStep;
pub use format::FormatStep;
pub use links::LinksStep;
pub use popularity::PopularityStep;
pub use self_link::SelfLinkStep;
