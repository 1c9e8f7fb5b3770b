mod persistence_tests;
mod pipeline_tests;
mod state_tests;
mod support;
mod sync_tests;
