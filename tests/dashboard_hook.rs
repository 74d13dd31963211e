#![cfg(feature = "dioxus")]

use dashboard_provider::prelude::*;
use dioxus::prelude::*;
use dioxus_core::NoOpMutations;
use futures::FutureExt;
use std::cell::RefCell;
use std::future::Future;
use std::rc::Rc;
use std::sync::{
    Arc,
    atomic::{AtomicU32, Ordering},
};
use std::time::Duration;
use tokio::{task::yield_now, time::sleep};

#[derive(Clone)]
struct Upstream {
    calls: Arc<AtomicU32>,
}

impl PartialEq for Upstream {
    fn eq(&self, _other: &Self) -> bool {
        true
    }
}

impl Upstream {
    fn new() -> (Self, Arc<AtomicU32>) {
        let calls = Arc::new(AtomicU32::new(0));
        (
            Self {
                calls: calls.clone(),
            },
            calls,
        )
    }

    fn source(&self, key: &str) -> SourceDescriptor<u32> {
        let calls = self.calls.clone();
        SourceDescriptor::new(key, Duration::from_secs(5), Duration::from_secs(10), move || {
            let calls = calls.clone();
            async move { Ok(calls.fetch_add(1, Ordering::SeqCst) + 100) }
        })
    }
}

#[derive(Props, Clone, PartialEq)]
struct ViewerProps {
    upstream: Upstream,
    duplicate: bool,
    values: Rc<RefCell<Vec<Option<u32>>>>,
    errors: Rc<RefCell<Vec<DashboardError>>>,
}

#[allow(non_snake_case)]
fn Viewer(props: ViewerProps) -> Element {
    let upstream = props.upstream.clone();
    let duplicate = props.duplicate;
    let dashboard = use_dashboard(SchedulerConfig::new().without_jitter(), move || {
        let mut sources = vec![upstream.source("idx")];
        if duplicate {
            sources.push(upstream.source("idx"));
        }
        sources
    });

    let snapshot = dashboard.snapshot();
    let values = props.values.clone();
    use_effect(move || {
        values
            .borrow_mut()
            .push(snapshot.read().value("idx").copied());
    });

    let error = dashboard.error();
    let errors = props.errors.clone();
    use_effect(move || {
        if let Some(err) = error.read().clone() {
            errors.borrow_mut().push(err);
        }
    });

    rsx! {}
}

fn block_on_test(fut: impl Future<Output = ()>) {
    tokio::runtime::Runtime::new()
        .expect("tokio runtime")
        .block_on(fut);
}

async fn pump(vdom: &mut VirtualDom) {
    let mut mutations = NoOpMutations;
    for _ in 0..20 {
        while vdom.wait_for_work().now_or_never().is_some() {
            vdom.render_immediate(&mut mutations);
        }
        yield_now().await;
        sleep(Duration::from_millis(1)).await;
    }
}

#[test]
fn publishes_snapshots_into_signal() {
    block_on_test(async {
        let (upstream, calls) = Upstream::new();
        let values = Rc::new(RefCell::new(Vec::new()));
        let errors = Rc::new(RefCell::new(Vec::new()));

        let mut vdom = VirtualDom::new_with_props(
            Viewer,
            ViewerProps {
                upstream,
                duplicate: false,
                values: values.clone(),
                errors: errors.clone(),
            },
        );
        vdom.rebuild_in_place();
        pump(&mut vdom).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(values.borrow().first(), Some(&None), "starts empty");
        assert_eq!(values.borrow().last(), Some(&Some(100)));
        assert!(errors.borrow().is_empty());
    });
}

#[test]
fn reports_rejected_sources_as_error() {
    block_on_test(async {
        let (upstream, calls) = Upstream::new();
        let values = Rc::new(RefCell::new(Vec::new()));
        let errors = Rc::new(RefCell::new(Vec::new()));

        let mut vdom = VirtualDom::new_with_props(
            Viewer,
            ViewerProps {
                upstream,
                duplicate: true,
                values: values.clone(),
                errors: errors.clone(),
            },
        );
        vdom.rebuild_in_place();
        pump(&mut vdom).await;

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(
            errors.borrow().last(),
            Some(&DashboardError::DuplicateSource { key: "idx".into() })
        );
    });
}
