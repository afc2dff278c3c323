pub mod alert;
pub mod composite;
pub mod contract;
pub mod portfolio;
pub mod rating;
pub mod recommendation;
pub mod risk;
pub mod signals;
pub mod trade;
