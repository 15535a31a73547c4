mod cache_tests;
mod helpers;
mod iterator_tests;
