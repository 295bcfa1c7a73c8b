//! The standard fold rule set, in priority order.

mod api_event;
mod event_source;
mod function;
mod function_url;
mod http_shell;
mod layer;
mod rest_shell;
mod schedule;
mod storage_event;
mod table;

pub use api_event::ApiEventFold;
pub use event_source::EventSourceFold;
pub use function::FunctionFold;
pub use function_url::FunctionUrlFold;
pub use http_shell::HttpShellFold;
pub use layer::LayerFold;
pub use rest_shell::RestShellFold;
pub use schedule::ScheduleRuleFold;
pub use storage_event::StorageEventFold;
pub use table::SimpleTableFold;

use crate::rule::FoldRule;

/// Every standard rule. Function folding runs first so event rules can hang
/// events off the produced serverless functions; shell folds run after the
/// method folds that empty the shells out.
#[must_use]
pub fn standard_rules() -> Vec<Box<dyn FoldRule>> {
    vec![
        Box::new(FunctionFold),
        Box::new(FunctionUrlFold),
        Box::new(ApiEventFold),
        Box::new(RestShellFold),
        Box::new(HttpShellFold),
        Box::new(EventSourceFold),
        Box::new(StorageEventFold),
        Box::new(ScheduleRuleFold),
        Box::new(SimpleTableFold),
        Box::new(LayerFold),
    ]
}
