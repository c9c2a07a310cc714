//! Effect and preload-effect producers.
//!
//! An effect producer receives the input stream of its own trigger creator and
//! returns either nothing (a dormant effect) or a stream of actions that the
//! store feeds back into dispatch. A preload producer takes no input; only its
//! first emission counts, and the store stays unready until every active
//! preload producer has emitted once.

use std::cell::RefCell;
use std::fmt::Display;
use std::rc::Rc;

use crate::action::{Action, ActionCreator, ActionList, Payload};
use crate::error::{ProducerKind, Result, StoreError};
use crate::stream::Stream;

/// Input handed to an effect producer: payloads of its trigger action.
pub type EffectInput = Stream<Option<Payload>>;

/// Anything a producer may return.
///
/// `()` and `None` declare a dormant producer, a `Stream` (bare or in `Some`)
/// an active one. An `Err` is reported as a contract violation.
pub trait IntoEffectStream<T: 'static> {
    fn into_effect_stream(self) -> std::result::Result<Option<Stream<T>>, String>;
}

impl<T: 'static> IntoEffectStream<T> for () {
    fn into_effect_stream(self) -> std::result::Result<Option<Stream<T>>, String> {
        Ok(None)
    }
}

impl<T: 'static> IntoEffectStream<T> for Stream<T> {
    fn into_effect_stream(self) -> std::result::Result<Option<Stream<T>>, String> {
        Ok(Some(self))
    }
}

impl<T: 'static> IntoEffectStream<T> for Option<Stream<T>> {
    fn into_effect_stream(self) -> std::result::Result<Option<Stream<T>>, String> {
        Ok(self)
    }
}

impl<T: 'static, R: IntoEffectStream<T>, E: Display> IntoEffectStream<T> for std::result::Result<R, E> {
    fn into_effect_stream(self) -> std::result::Result<Option<Stream<T>>, String> {
        self.map_err(|e| e.to_string())?.into_effect_stream()
    }
}

type EffectProducer = Box<dyn FnOnce(EffectInput) -> std::result::Result<Option<Stream<Action>>, String>>;
type PreloadProducer = Box<dyn FnOnce() -> std::result::Result<Option<Stream<ActionList>>, String>>;

pub(crate) struct EffectRecord {
    pub(crate) id: usize,
    pub(crate) creator: ActionCreator,
    producer: RefCell<Option<EffectProducer>>,
}

impl EffectRecord {
    pub(crate) fn new<F, R>(id: usize, creator: ActionCreator, producer: F) -> Self
    where
        F: FnOnce(EffectInput) -> R + 'static,
        R: IntoEffectStream<Action>,
    {
        Self {
            id,
            creator,
            producer: RefCell::new(Some(Box::new(move |input| producer(input).into_effect_stream()))),
        }
    }

    /// Runs the producer once and taps its output into the creator's output
    /// channel. `None` for dormant effects.
    fn activate(&self) -> Result<Option<Stream<Action>>> {
        let Some(producer) = self.producer.borrow_mut().take() else {
            return Ok(None);
        };
        let output = producer(self.creator.input()).map_err(|reason| StoreError::ContractViolation {
            kind: ProducerKind::Effect,
            id: self.id,
            reason,
        })?;
        let Some(output) = output else {
            log::debug!("effect #{} is dormant", self.id);
            return Ok(None);
        };
        let creator = self.creator.clone();
        Ok(Some(output.tap(move |action| {
            creator.emit_output(Some(Rc::new(action.clone()) as Payload));
        })))
    }
}

pub(crate) struct PreloadRecord {
    pub(crate) id: usize,
    producer: PreloadProducer,
}

impl PreloadRecord {
    pub(crate) fn new<F, R>(id: usize, producer: F) -> Self
    where
        F: FnOnce() -> R + 'static,
        R: IntoEffectStream<ActionList>,
    {
        Self {
            id,
            producer: Box::new(move || producer().into_effect_stream()),
        }
    }

    fn activate(self) -> Result<Option<Stream<ActionList>>> {
        let id = self.id;
        let output = (self.producer)().map_err(|reason| StoreError::ContractViolation {
            kind: ProducerKind::PreloadEffect,
            id,
            reason,
        })?;
        Ok(output.map(|stream| stream.take(1)))
    }
}

/// Merged action stream of every active effect.
pub(crate) fn merge_effect_actions(effects: &[EffectRecord]) -> Result<Stream<Action>> {
    let mut active = Vec::with_capacity(effects.len());
    for effect in effects {
        if let Some(stream) = effect.activate()? {
            active.push(stream);
        }
    }
    Ok(Stream::merge(active))
}

/// First emission of every active preload producer, combined positionally and
/// flattened into one batch. Completes without emitting when there is nothing
/// to wait for.
pub(crate) fn combine_preload_actions(preloads: Vec<PreloadRecord>) -> Result<Stream<ActionList>> {
    let mut active = Vec::with_capacity(preloads.len());
    for preload in preloads {
        if let Some(stream) = preload.activate()? {
            active.push(stream);
        }
    }
    Ok(Stream::combine_latest(active)
        .map(|lists| {
            lists.into_iter().fold(ActionList::new(), |mut all, list| {
                all.extend(list);
                all
            })
        })
        .take(1))
}
