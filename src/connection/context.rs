//! Context-scoping decorator.

use crate::error::{KiwiResult, ModelError};
use crate::model::{Term, Triple};

use super::{ConnectionState, TripleConnection, TripleIter, TriplePattern};

/// Confines a connection to one named graph.
///
/// Every read, write, removal and clear goes to the fixed context, whatever
/// context the caller passes.
#[derive(Debug)]
pub struct ContextAwareConnection<C> {
    inner: C,
    context: Term,
}

impl<C: TripleConnection> ContextAwareConnection<C> {
    /// Wrap `inner`. The context must be a URI or blank node.
    pub fn new(inner: C, context: Term) -> KiwiResult<Self> {
        if !context.is_resource() {
            return Err(ModelError::InvalidStatement {
                message: format!("context {context} is a literal"),
            }
            .into());
        }
        Ok(Self { inner, context })
    }

    pub fn context(&self) -> &Term {
        &self.context
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }

    pub fn inner_mut(&mut self) -> &mut C {
        &mut self.inner
    }

    pub fn into_inner(self) -> C {
        self.inner
    }

    fn scoped(&self, pattern: &TriplePattern) -> TriplePattern {
        TriplePattern {
            contexts: vec![Some(self.context.clone())],
            ..pattern.clone()
        }
    }

    fn fixed(&self) -> [Option<Term>; 1] {
        [Some(self.context.clone())]
    }
}

impl<C: TripleConnection> TripleConnection for ContextAwareConnection<C> {
    fn state(&self) -> ConnectionState {
        self.inner.state()
    }

    fn begin(&mut self) -> KiwiResult<()> {
        self.inner.begin()
    }

    fn commit(&mut self) -> KiwiResult<()> {
        self.inner.commit()
    }

    fn rollback(&mut self) -> KiwiResult<()> {
        self.inner.rollback()
    }

    fn get_statements<'a>(&'a self, pattern: &TriplePattern) -> KiwiResult<TripleIter<'a>> {
        self.inner.get_statements(&self.scoped(pattern))
    }

    fn add_statement(
        &mut self,
        subject: &Term,
        predicate: &Term,
        object: &Term,
        _context: Option<&Term>,
    ) -> KiwiResult<Triple> {
        let context = self.context.clone();
        self.inner.add_statement(subject, predicate, object, Some(&context))
    }

    fn remove_statements(&mut self, pattern: &TriplePattern) -> KiwiResult<usize> {
        let pattern = self.scoped(pattern);
        self.inner.remove_statements(&pattern)
    }

    fn clear(&mut self, _contexts: &[Option<Term>]) -> KiwiResult<usize> {
        let fixed = self.fixed();
        self.inner.clear(&fixed)
    }

    fn get_context_ids(&self) -> KiwiResult<Vec<Term>> {
        Ok(vec![self.context.clone()])
    }

    fn size(&self, _contexts: &[Option<Term>]) -> KiwiResult<u64> {
        self.inner.size(&self.fixed())
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;

    /// Records the contexts every call receives.
    #[derive(Default)]
    struct Recorder {
        seen: RefCell<Vec<Vec<Option<Term>>>>,
    }

    impl TripleConnection for Recorder {
        fn state(&self) -> ConnectionState {
            ConnectionState::Active
        }

        fn begin(&mut self) -> KiwiResult<()> {
            Ok(())
        }

        fn commit(&mut self) -> KiwiResult<()> {
            Ok(())
        }

        fn rollback(&mut self) -> KiwiResult<()> {
            Ok(())
        }

        fn get_statements<'a>(&'a self, pattern: &TriplePattern) -> KiwiResult<TripleIter<'a>> {
            self.seen.borrow_mut().push(pattern.contexts.clone());
            Ok(Box::new(std::iter::empty()))
        }

        fn add_statement(
            &mut self,
            _subject: &Term,
            _predicate: &Term,
            _object: &Term,
            context: Option<&Term>,
        ) -> KiwiResult<Triple> {
            self.seen.borrow_mut().push(vec![context.cloned()]);
            Err(ModelError::InvalidStatement {
                message: "recorded".into(),
            }
            .into())
        }

        fn remove_statements(&mut self, pattern: &TriplePattern) -> KiwiResult<usize> {
            self.seen.borrow_mut().push(pattern.contexts.clone());
            Ok(0)
        }

        fn clear(&mut self, contexts: &[Option<Term>]) -> KiwiResult<usize> {
            self.seen.borrow_mut().push(contexts.to_vec());
            Ok(0)
        }

        fn get_context_ids(&self) -> KiwiResult<Vec<Term>> {
            Ok(vec![Term::uri("http://ex.org/other")])
        }

        fn size(&self, contexts: &[Option<Term>]) -> KiwiResult<u64> {
            self.seen.borrow_mut().push(contexts.to_vec());
            Ok(0)
        }
    }

    #[test]
    fn every_operation_uses_the_fixed_context() {
        let fixed = Term::uri("http://ex.org/cache");
        let mut conn = ContextAwareConnection::new(Recorder::default(), fixed.clone()).unwrap();
        let other = Term::uri("http://ex.org/elsewhere");
        let s = Term::uri("http://ex.org/s");

        let _ = conn.get_statements(&TriplePattern::any().context(other.clone()));
        let _ = conn.add_statement(&s, &s, &s, Some(&other));
        conn.remove_statements(&TriplePattern::any().default_graph()).unwrap();
        conn.clear(&[]).unwrap();
        conn.size(&[Some(other)]).unwrap();

        let seen = conn.inner().seen.borrow().clone();
        assert_eq!(seen.len(), 5);
        assert!(seen.iter().all(|c| c == &vec![Some(fixed.clone())]));
        assert_eq!(conn.get_context_ids().unwrap(), vec![fixed]);
    }

    #[test]
    fn literal_context_is_rejected() {
        assert!(ContextAwareConnection::new(Recorder::default(), Term::literal("x")).is_err());
    }
}
