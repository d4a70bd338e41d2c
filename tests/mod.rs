mod api_tests;
mod common;
mod gateway_tests;
mod rate_limit_tests;
mod retry_tests;
mod stackdriver_tests;
