mod helpers;
mod snapshot_tests;
