//! Test attributes that fail a test instead of hanging the suite.
//!
//! The channel tests exercise blocking locks and condvars; a protocol bug
//! shows up as a wedged thread, so every such test runs on a watchdog thread
//! with a hard deadline. `#[test_timeout::timeout]` wraps a synchronous test,
//! `#[test_timeout::tokio_timeout_test]` wraps an async one in a
//! current-thread runtime. Both default to a 30 second deadline; pass an
//! integer argument for a different number of seconds.

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{parse_macro_input, ItemFn, LitInt};

const DEFAULT_DEADLINE_SECS: u64 = 30;

#[proc_macro_attribute]
pub fn timeout(attr: TokenStream, item: TokenStream) -> TokenStream {
    let deadline = match parse_deadline(attr) {
        Ok(secs) => secs,
        Err(err) => return err.to_compile_error().into(),
    };
    let test_fn = parse_macro_input!(item as ItemFn);
    if test_fn.sig.asyncness.is_some() {
        return syn::Error::new_spanned(
            &test_fn.sig.ident,
            "timeout wraps synchronous tests; use tokio_timeout_test for async",
        )
        .to_compile_error()
        .into();
    }
    let body = &test_fn.block;
    let driver = quote!(#body);
    expand(test_fn.clone(), deadline, driver)
}

#[proc_macro_attribute]
pub fn tokio_timeout_test(attr: TokenStream, item: TokenStream) -> TokenStream {
    let deadline = match parse_deadline(attr) {
        Ok(secs) => secs,
        Err(err) => return err.to_compile_error().into(),
    };
    let mut test_fn = parse_macro_input!(item as ItemFn);
    if test_fn.sig.asyncness.take().is_none() {
        return syn::Error::new_spanned(
            &test_fn.sig.ident,
            "tokio_timeout_test requires an async fn",
        )
        .to_compile_error()
        .into();
    }
    let body = &test_fn.block;
    let driver = quote! {{
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("tokio runtime for test")
            .block_on(async #body)
    }};
    expand(test_fn.clone(), deadline, driver)
}

fn parse_deadline(attr: TokenStream) -> Result<u64, syn::Error> {
    if attr.is_empty() {
        return Ok(DEFAULT_DEADLINE_SECS);
    }
    let lit: LitInt = syn::parse(attr)?;
    let secs: u64 = lit.base10_parse()?;
    if secs == 0 {
        return Err(syn::Error::new_spanned(lit, "deadline must be non-zero"));
    }
    Ok(secs)
}

fn expand(test_fn: ItemFn, deadline_secs: u64, body: TokenStream2) -> TokenStream {
    let ItemFn {
        attrs, vis, sig, ..
    } = test_fn;
    let name = sig.ident.to_string();

    TokenStream::from(quote! {
        #[test]
        #(#attrs)*
        #vis #sig {
            let deadline = std::time::Duration::from_secs(#deadline_secs);
            let (done_tx, done_rx) = std::sync::mpsc::channel();
            std::thread::Builder::new()
                .name(format!("{}-body", #name))
                .spawn(move || {
                    let outcome = std::panic::catch_unwind(
                        std::panic::AssertUnwindSafe(|| #body),
                    );
                    let _ = done_tx.send(outcome);
                })
                .expect("spawn test thread");
            match done_rx.recv_timeout(deadline) {
                Ok(Ok(_)) => {}
                Ok(Err(panic)) => std::panic::resume_unwind(panic),
                Err(_) => panic!("test exceeded {}s deadline", #deadline_secs),
            }
        }
    })
}
