mod store;
mod utils;
