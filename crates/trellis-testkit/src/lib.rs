// crates/trellis-testkit/src/lib.rs
// ============================================================================
// Module: Trellis Testkit
// Description: Integration test support for Trellis applications.
// Purpose: Boot applications on local ports and drive them with a cookie-aware client.
// Dependencies: reqwest, trellis-core
// ============================================================================

//! ## Overview
//! The testkit starts an application through [`TestServer`], talks to it with
//! [`TestBrowser`], and pairs the two in [`TestFixture`] for tests that want a
//! single handle with automatic teardown.
//!
//! ```no_run
//! use trellis_testkit::TestFixture;
//! # #[derive(Default)]
//! # struct MyApp;
//! # impl trellis_core::Application for MyApp {
//! #     fn routes(
//! #         &self,
//! #         _: &trellis_core::Injector,
//! #     ) -> Result<axum::Router, trellis_core::ApplicationError> {
//! #         Ok(axum::Router::new())
//! #     }
//! # }
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let fixture = TestFixture::start::<MyApp>()?;
//! let body = fixture.browser()?.get_text(&fixture.to("/")?)?;
//! # let _ = body;
//! # Ok(())
//! # }
//! ```

pub mod browser;
pub mod fixture;
pub mod server;
pub mod timeouts;

pub use browser::BrowserError;
pub use browser::BrowserResponse;
pub use browser::TestBrowser;
pub use fixture::FixtureError;
pub use fixture::TestFixture;
pub use server::TestServer;
pub use server::TestServerBuilder;
pub use server::TestServerError;
pub use server::server_lock;
pub use timeouts::TimeoutError;
