mod helpers;
mod rotating_tests;
