mod helpers;
mod manifest_tests;
