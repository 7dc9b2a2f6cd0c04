//! Definitions: request constraints, a reply strategy and an expected call count.

use super::constraint::RequestConstraint;
use super::error::MockError;
use super::reply::ReplyStrategy;
use super::request::{MockRequest, MockResponse};
use parking_lot::Mutex;

/// One node of a service mock's behaviour tree.
///
/// The call counter is the only state that changes while a running context is
/// active; everything else is fixed when the definition is loaded.
#[derive(Debug)]
pub struct Definition {
    path: String,
    constraints: Vec<RequestConstraint>,
    strategy: Option<ReplyStrategy>,
    calls_expected: Option<usize>,
    calls: Mutex<usize>,
}

impl Definition {
    /// `path` labels the definition in error reports; `calls` of `None` leaves the
    /// number of calls unchecked.
    pub fn new(
        path: impl Into<String>,
        constraints: Vec<RequestConstraint>,
        strategy: Option<ReplyStrategy>,
        calls: Option<usize>,
    ) -> Self {
        Self {
            path: path.into(),
            constraints,
            strategy,
            calls_expected: calls,
            calls: Mutex::new(0),
        }
    }

    /// A definition answering every request with 204.
    pub fn nop() -> Self {
        Self::new("$", Vec::new(), Some(ReplyStrategy::Nop), None)
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn strategy(&self) -> Option<&ReplyStrategy> {
        self.strategy.as_ref()
    }

    /// Calls observed in the current running context.
    pub fn calls(&self) -> usize {
        *self.calls.lock()
    }

    /// Count the call, check every constraint and reply.
    ///
    /// Constraint failures do not stop the reply: the configured strategy still
    /// answers, and its errors are appended after the constraint errors.
    pub fn execute(&self, response: &mut MockResponse, request: &MockRequest) -> Vec<MockError> {
        *self.calls.lock() += 1;
        let mut errors = self.verify(request);
        if let Some(strategy) = &self.strategy {
            errors.extend(strategy.handle_request(response, request));
        }
        errors
    }

    /// Count the call and reply, skipping the constraints.
    pub fn execute_without_verifying(
        &self,
        response: &mut MockResponse,
        request: &MockRequest,
    ) -> Vec<MockError> {
        *self.calls.lock() += 1;
        match &self.strategy {
            Some(strategy) => strategy.handle_request(response, request),
            None => vec![MockError::MissingStrategy {
                path: self.path.clone(),
            }],
        }
    }

    /// Run the constraints only. The request dump is rendered once, on the first
    /// violation.
    pub(crate) fn verify(&self, request: &MockRequest) -> Vec<MockError> {
        let mut errors = Vec::new();
        let mut dump: Option<String> = None;
        for constraint in &self.constraints {
            for violation in constraint.verify(request) {
                let request = dump.get_or_insert_with(|| request.dump()).clone();
                errors.push(MockError::Constraint {
                    kind: constraint.kind(),
                    violation,
                    request,
                });
            }
        }
        errors
    }

    pub fn reset_running_context(&self) {
        if let Some(strategy) = &self.strategy {
            strategy.reset_running_context();
        }
        *self.calls.lock() = 0;
    }

    /// Nested errors first, then this definition's call-count check.
    pub fn end_running_context(&self) -> Vec<MockError> {
        let mut errors = match &self.strategy {
            Some(strategy) => strategy.end_running_context(),
            None => Vec::new(),
        };
        let actual = self.calls();
        if let Some(expected) = self.calls_expected {
            if expected != actual {
                errors.push(MockError::CallCount {
                    path: self.path.clone(),
                    expected,
                    actual,
                });
            }
        }
        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::error::ConstraintViolation;
    use crate::mocks::reply::ConstantReply;
    use hyper::{HeaderMap, Method, StatusCode, Uri};

    fn request(method: Method) -> MockRequest {
        MockRequest::new(method, Uri::from_static("/orders"), HeaderMap::new(), "")
    }

    fn constant(calls: Option<usize>) -> Definition {
        Definition::new(
            "$",
            Vec::new(),
            Some(ReplyStrategy::Constant(ConstantReply::new(
                "ok",
                StatusCode::OK,
                Vec::new(),
            ))),
            calls,
        )
    }

    fn call(definition: &Definition, times: usize) {
        for _ in 0..times {
            definition.execute(&mut MockResponse::default(), &request(Method::GET));
        }
    }

    #[test]
    fn test_exact_call_count_passes() {
        let definition = constant(Some(2));
        call(&definition, 2);
        assert!(definition.end_running_context().is_empty());
    }

    #[test]
    fn test_too_few_or_too_many_calls_yield_one_error() {
        for times in [1, 3] {
            let definition = constant(Some(2));
            call(&definition, times);
            assert_eq!(
                definition.end_running_context(),
                vec![MockError::CallCount {
                    path: "$".to_string(),
                    expected: 2,
                    actual: times,
                }]
            );
        }
    }

    #[test]
    fn test_unconstrained_calls_are_not_checked() {
        let definition = constant(None);
        call(&definition, 5);
        assert_eq!(definition.calls(), 5);
        assert!(definition.end_running_context().is_empty());
    }

    #[test]
    fn test_reset_zeroes_the_counter() {
        let definition = constant(Some(1));
        call(&definition, 3);
        definition.reset_running_context();
        assert_eq!(definition.calls(), 0);
        call(&definition, 1);
        assert!(definition.end_running_context().is_empty());
    }

    #[test]
    fn test_constraint_failures_do_not_stop_the_reply() {
        let definition = Definition::new(
            "$",
            vec![
                RequestConstraint::method_is("POST"),
                RequestConstraint::Nop,
            ],
            Some(ReplyStrategy::Constant(ConstantReply::new(
                "replied",
                StatusCode::OK,
                Vec::new(),
            ))),
            None,
        );
        let mut response = MockResponse::default();
        let errors = definition.execute(&mut response, &request(Method::GET));

        assert_eq!(response.body, "replied");
        assert_eq!(errors.len(), 1);
        match &errors[0] {
            MockError::Constraint {
                kind,
                violation,
                request,
            } => {
                assert_eq!(*kind, "methodIs");
                assert!(matches!(violation, ConstraintViolation::MethodMismatch { .. }));
                assert!(request.starts_with("GET /orders HTTP/1.1"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_missing_strategy() {
        let definition = Definition::new("$.x", Vec::new(), None, None);
        let mut response = MockResponse::default();
        assert!(definition
            .execute(&mut response, &request(Method::GET))
            .is_empty());
        assert_eq!(
            definition.execute_without_verifying(&mut response, &request(Method::GET)),
            vec![MockError::MissingStrategy {
                path: "$.x".to_string()
            }]
        );
        assert_eq!(definition.calls(), 2);
    }

    #[test]
    fn test_nested_errors_come_first() {
        let definition = Definition::new(
            "$",
            Vec::new(),
            Some(ReplyStrategy::method_vary(vec![(
                "GET".to_string(),
                Definition::new("$.methodVary.GET", Vec::new(), Some(ReplyStrategy::Nop), Some(1)),
            )])),
            Some(1),
        );
        let errors = definition.end_running_context();
        assert_eq!(errors.len(), 2);
        assert!(matches!(&errors[0], MockError::CallCount { path, .. } if path == "$.methodVary.GET"));
        assert!(matches!(&errors[1], MockError::CallCount { path, .. } if path == "$"));
    }
}
