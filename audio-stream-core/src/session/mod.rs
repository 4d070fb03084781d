pub mod engine;
mod registry;
mod stream;

#[cfg(test)]
mod fake_backend;
