//! HTTP request adapters
//!
//! GET and POST wrappers over a callback-style [`HttpHost`]. Both return task
//! factories whose tasks complete with a [`CallbackResult`]; transport failures
//! arrive as status 400 records, never as errors.

use super::adapter::{self, CallbackOperation, CallbackResult, Headers, OnFailure, OnSuccess};
use super::executor::{Scheduler, TaskFactory};
use std::collections::BTreeMap;
use std::rc::Rc;

/// Form parameters for POST requests
pub type Params = BTreeMap<String, String>;

/// Host HTTP facility
pub trait HttpHost: 'static {
    /// Whether the host accepts another request right now
    fn can_request(&self) -> bool;

    fn fetch(&self, url: &str, headers: &Headers, on_success: OnSuccess, on_failure: OnFailure);

    fn post(
        &self,
        url: &str,
        params: &Params,
        headers: &Headers,
        on_success: OnSuccess,
        on_failure: OnFailure,
    );
}

/// HTTP request builder
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HttpRequest {
    pub url: String,
    pub headers: Headers,
}

impl HttpRequest {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            headers: Headers::new(),
        }
    }

    /// Add a header
    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.insert(name.to_string(), value.to_string());
        self
    }
}

struct Fetch<H> {
    host: Rc<H>,
}

impl<H: HttpHost> CallbackOperation for Fetch<H> {
    type Args = HttpRequest;

    fn is_ready(&self) -> bool {
        self.host.can_request()
    }

    fn issue(&self, request: HttpRequest, on_success: OnSuccess, on_failure: OnFailure) {
        self.host
            .fetch(&request.url, &request.headers, on_success, on_failure);
    }
}

struct Post<H> {
    host: Rc<H>,
}

impl<H: HttpHost> CallbackOperation for Post<H> {
    type Args = (HttpRequest, Params);

    fn is_ready(&self) -> bool {
        self.host.can_request()
    }

    fn issue(&self, (request, params): Self::Args, on_success: OnSuccess, on_failure: OnFailure) {
        self.host
            .post(&request.url, &params, &request.headers, on_success, on_failure);
    }
}

/// GET adapter: `get(..).start(request)`
pub fn get<H: HttpHost>(scheduler: &Scheduler, host: Rc<H>) -> TaskFactory<HttpRequest, CallbackResult> {
    adapter::adapt(scheduler, Fetch { host })
}

/// POST adapter: `post(..).start((request, params))`
pub fn post<H: HttpHost>(
    scheduler: &Scheduler,
    host: Rc<H>,
) -> TaskFactory<(HttpRequest, Params), CallbackResult> {
    adapter::adapt(scheduler, Post { host })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::adapter::Response;
    use crate::kernel::{Channel, Outcome};
    use crate::platform::ManualClock;
    use std::cell::{Cell, RefCell};

    /// Answers on the tick after the request, one request in flight at a time
    #[derive(Default)]
    struct FakeHost {
        busy: Cell<bool>,
        log: RefCell<Vec<String>>,
        inflight: RefCell<Vec<(String, OnSuccess, OnFailure)>>,
    }

    impl FakeHost {
        /// Deliver every in-flight response; URLs containing "down" fail
        fn pump(&self) {
            let inflight: Vec<_> = self.inflight.borrow_mut().drain(..).collect();
            for (url, on_success, on_failure) in inflight {
                if url.contains("down") {
                    on_failure("unreachable".to_string());
                } else {
                    on_success(Response {
                        body: format!("body of {}", url),
                        headers: Headers::from([("server".to_string(), "fake".to_string())]),
                        status: 200,
                    });
                }
            }
            self.busy.set(false);
        }
    }

    impl HttpHost for FakeHost {
        fn can_request(&self) -> bool {
            !self.busy.get()
        }

        fn fetch(&self, url: &str, headers: &Headers, on_success: OnSuccess, on_failure: OnFailure) {
            self.busy.set(true);
            self.log
                .borrow_mut()
                .push(format!("GET {} {:?}", url, headers.keys().collect::<Vec<_>>()));
            self.inflight
                .borrow_mut()
                .push((url.to_string(), on_success, on_failure));
        }

        fn post(
            &self,
            url: &str,
            params: &Params,
            _headers: &Headers,
            on_success: OnSuccess,
            on_failure: OnFailure,
        ) {
            self.busy.set(true);
            self.log
                .borrow_mut()
                .push(format!("POST {} {:?}", url, params));
            self.inflight
                .borrow_mut()
                .push((url.to_string(), on_success, on_failure));
        }
    }

    #[test]
    fn test_get_round_trip() {
        let sched = Scheduler::new(Rc::new(ManualClock::new()));
        let host = Rc::new(FakeHost::default());
        let handle = get(&sched, host.clone())
            .start(HttpRequest::new("http://a.test/").header("Accept", "text/plain"));

        sched.tick(&Channel::PRIMARY);
        assert!(!handle.is_complete());
        assert_eq!(host.log.borrow().as_slice(), &["GET http://a.test/ [\"Accept\"]"]);

        host.pump();
        sched.tick(&Channel::PRIMARY);
        sched.tick(&Channel::PRIMARY);
        let result = handle.outcome().and_then(Outcome::success).expect("completed");
        assert_eq!(result.content, "body of http://a.test/");
        assert_eq!(result.status, 200);
    }

    #[test]
    fn test_post_failure_is_client_error() {
        let sched = Scheduler::new(Rc::new(ManualClock::new()));
        let host = Rc::new(FakeHost::default());
        let params = Params::from([("k".to_string(), "v".to_string())]);
        let handle = post(&sched, host.clone()).start((HttpRequest::new("http://down.test/"), params));

        sched.tick(&Channel::PRIMARY);
        host.pump();
        sched.tick(&Channel::PRIMARY);
        sched.tick(&Channel::PRIMARY);

        let result = handle.outcome().and_then(Outcome::success).expect("completed");
        assert_eq!(result, CallbackResult::failure("unreachable"));
        assert!(result.headers.is_empty());
        assert_eq!(host.log.borrow()[0], "POST http://down.test/ {\"k\": \"v\"}");
    }

    #[test]
    fn test_busy_host_throttles_second_request() {
        let sched = Scheduler::new(Rc::new(ManualClock::new()));
        let host = Rc::new(FakeHost::default());
        let factory = get(&sched, host.clone());
        let first = factory.start(HttpRequest::new("http://one.test/"));
        let second = factory.start(HttpRequest::new("http://two.test/"));

        sched.tick(&Channel::PRIMARY);
        assert_eq!(host.log.borrow().len(), 1);

        sched.tick(&Channel::PRIMARY);
        assert_eq!(host.log.borrow().len(), 1);

        // First returns as soon as the host frees up; second takes the slot
        host.pump();
        sched.tick(&Channel::PRIMARY);
        assert_eq!(host.log.borrow().len(), 2);

        host.pump();
        sched.tick(&Channel::PRIMARY);
        assert!(first.is_complete());
        assert!(!second.is_complete());

        sched.tick(&Channel::PRIMARY);
        assert!(second.is_complete());
    }
}
