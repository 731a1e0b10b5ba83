mod common;
mod dedup_tests;
mod store_tests;
