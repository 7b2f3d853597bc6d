mod postgres_store_test;
mod sync_test;
