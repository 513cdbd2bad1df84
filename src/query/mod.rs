// Submodules for separation of concerns
mod eval;
mod parse;
mod translate;
mod types;

// Public API re-exports
pub use eval::{compare_bson, compare_docs, eval_filter, get_path, project, set_path, unset_path};
pub use parse::{
    PopulateSerde, PopulateSpecSerde, RawQueryOptions, SelectSerde, SortSerde, parse_filter_doc,
    parse_filter_json, parse_query_options_json,
};
pub use translate::{Query, QueryMode, translate};
pub use types::{
    CmpOp, Filter, MAX_LIMIT, MAX_POPULATE_PATHS, MAX_PROJECTION_FIELDS, MAX_SORT_FIELDS, Order,
    PopulateSpec, Projection, QueryOptions, ReadPreference, SortSpec,
};
