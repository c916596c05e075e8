// Include handlers module directly from handlers.rs
#[path = "handlers.rs"]
pub mod handlers;

pub use handlers::{
    format_scraper_list, init_database, load_connections, load_scrape_specs, open_store,
    register_files, resolve_db_path,
};
