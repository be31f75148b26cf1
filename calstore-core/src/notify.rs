//! Change notifications for the host and for live views.

use tokio::sync::mpsc;

use crate::component::{Component, ComponentId};
use crate::query::{CompiledQuery, QueryContext, QueryEvaluator};
use crate::sync::CollectionInfo;

/// Everything the backend reports to its host.
#[derive(Debug, Clone)]
pub enum BackendEvent {
    ComponentCreated(Component),
    ComponentModified {
        old: Option<Component>,
        new: Component,
    },
    /// `new` is set when removing an instance left an updated master behind.
    ComponentRemoved {
        id: ComponentId,
        old: Option<Component>,
        new: Option<Component>,
    },
    PropertyChanged {
        name: String,
        value: String,
    },
    Collection(CollectionInfo),
    Error(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ViewEvent {
    Added(Vec<Component>),
    Modified(Vec<Component>),
    Removed(Vec<ComponentId>),
    /// The initial result set has been delivered.
    Complete,
}

/// A live query. Dropping it ends the subscription.
pub struct View {
    id: u64,
    events: mpsc::UnboundedReceiver<ViewEvent>,
}

impl View {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub async fn recv(&mut self) -> Option<ViewEvent> {
        self.events.recv().await
    }

    pub fn try_recv(&mut self) -> Option<ViewEvent> {
        self.events.try_recv().ok()
    }
}

struct Registration {
    id: u64,
    query: CompiledQuery,
    sender: mpsc::UnboundedSender<ViewEvent>,
}

#[derive(Default)]
pub struct ViewSet {
    views: Vec<Registration>,
    next_id: u64,
}

impl ViewSet {
    /// Register `query` and deliver `initial` followed by `Complete`.
    pub fn open(&mut self, query: CompiledQuery, initial: Vec<Component>) -> View {
        let (sender, events) = mpsc::unbounded_channel();
        self.next_id += 1;
        let id = self.next_id;

        if !initial.is_empty() {
            let _ = sender.send(ViewEvent::Added(initial));
        }
        let _ = sender.send(ViewEvent::Complete);

        self.views.push(Registration { id, query, sender });
        View { id, events }
    }

    pub fn close(&mut self, id: u64) {
        self.views.retain(|v| v.id != id);
    }

    pub fn len(&self) -> usize {
        self.views.len()
    }

    pub fn is_empty(&self) -> bool {
        self.views.is_empty()
    }

    /// Route one event to every view whose query it concerns. Views whose
    /// receiver is gone are dropped.
    pub fn dispatch(&mut self, event: &BackendEvent, evaluator: &dyn QueryEvaluator, ctx: &QueryContext<'_>) {
        let matches = |query: &CompiledQuery, comp: &Option<Component>| {
            comp.as_ref()
                .map(|c| evaluator.matches(query, c, ctx))
                .unwrap_or(false)
        };

        self.views.retain(|view| {
            let update = match event {
                BackendEvent::ComponentCreated(comp) => evaluator
                    .matches(&view.query, comp, ctx)
                    .then(|| ViewEvent::Added(vec![comp.clone()])),
                BackendEvent::ComponentModified { old, new } => {
                    if evaluator.matches(&view.query, new, ctx) {
                        Some(ViewEvent::Modified(vec![new.clone()]))
                    } else if matches(&view.query, old) {
                        new.id().map(|id| ViewEvent::Removed(vec![id]))
                    } else {
                        None
                    }
                }
                BackendEvent::ComponentRemoved { id, old, new } => {
                    if matches(&view.query, new) {
                        new.clone().map(|c| ViewEvent::Modified(vec![c]))
                    } else if old.is_none() || matches(&view.query, old) {
                        Some(ViewEvent::Removed(vec![id.clone()]))
                    } else {
                        None
                    }
                }
                _ => None,
            };
            match update {
                Some(update) => view.sender.send(update).is_ok(),
                None => !view.sender.is_closed(),
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::Property;
    use crate::query::SexpEvaluator;
    use crate::timezone::{Resolver, TimezoneSet};

    fn make_test_event(uid: &str, summary: &str) -> Component {
        let mut comp = Component::new("VEVENT");
        comp.push_prop(Property::new("UID", uid));
        comp.push_prop(Property::new("SUMMARY", summary));
        comp
    }

    #[test]
    fn views_receive_initial_results_then_matching_updates() {
        let set = TimezoneSet::default();
        let ctx = QueryContext {
            resolver: Resolver::new(&set, None),
        };
        let evaluator = SexpEvaluator;
        let query = evaluator.compile(r#"(contains? "summary" "lunch")"#).unwrap();

        let mut views = ViewSet::default();
        let mut view = views.open(query, vec![make_test_event("a", "Lunch")]);
        assert_eq!(view.try_recv(), Some(ViewEvent::Added(vec![make_test_event("a", "Lunch")])));
        assert_eq!(view.try_recv(), Some(ViewEvent::Complete));

        views.dispatch(&BackendEvent::ComponentCreated(make_test_event("b", "Dinner")), &evaluator, &ctx);
        assert_eq!(view.try_recv(), None, "Non-matching create is filtered");

        views.dispatch(
            &BackendEvent::ComponentModified {
                old: Some(make_test_event("a", "Lunch")),
                new: make_test_event("a", "Late lunch"),
            },
            &evaluator,
            &ctx,
        );
        assert_eq!(view.try_recv(), Some(ViewEvent::Modified(vec![make_test_event("a", "Late lunch")])));

        views.dispatch(
            &BackendEvent::ComponentModified {
                old: Some(make_test_event("a", "Late lunch")),
                new: make_test_event("a", "Breakfast"),
            },
            &evaluator,
            &ctx,
        );
        assert_eq!(view.try_recv(), Some(ViewEvent::Removed(vec![ComponentId::new("a", None)])));
    }

    #[test]
    fn dropped_views_are_pruned() {
        let set = TimezoneSet::default();
        let ctx = QueryContext {
            resolver: Resolver::new(&set, None),
        };
        let evaluator = SexpEvaluator;
        let mut views = ViewSet::default();
        let view = views.open(evaluator.compile("#t").unwrap(), Vec::new());
        drop(view);

        views.dispatch(&BackendEvent::ComponentCreated(make_test_event("a", "A")), &evaluator, &ctx);
        assert!(views.is_empty());
    }
}
