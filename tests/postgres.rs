mod builder;
mod manager;
mod pg_store;
mod snapshot;
