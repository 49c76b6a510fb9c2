// api/stream.rs: streaming agent loop + StreamResult.
//
// Same transitions as generate(), but every canonical event is yielded as
// soon as it is produced. One StreamStart opens the whole session, a
// StepFinish closes each turn and one StreamEnd closes the session.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures::StreamExt;
use futures_core::Stream;
use llm_conduit_types::{BoxStream, Error, Message, Request, Response, StreamEvent};

use crate::emitter::CanonicalEmitter;
use crate::providers::Provider;
use crate::util::stream_accumulator::StreamState;

use super::prepare_request;
use super::state::{LoopState, TurnOutcome, after_tools, classify_turn};
use super::step::{ResponseBuilder, build_step};
use super::tool_loop::ToolExecutor;
use super::types::Tool;

/// What the orchestrator hands to [`StreamResult`].
enum Emitted {
    Event(StreamEvent),
    /// The aggregated response, delivered just before `StreamEnd`.
    Done(Box<Response>),
}

/// Run the agent loop as a stream of canonical events.
///
/// Any failure is reported twice: as an `Error` event, then as the stream's
/// terminal `Err` item. Nothing follows it. A failure before the first
/// provider payload still opens the stream with `StreamStart`.
pub fn stream<'a>(
    provider: &'a Provider,
    tools: &'a [Tool],
    executor: &'a ToolExecutor,
    mut request: Request,
) -> StreamResult<'a> {
    let inner = async_stream::stream! {
        let mut emitter = CanonicalEmitter::new();
        let mut state = StreamState::new(provider.name(), request.model.clone());
        let decode = request.response_format.is_some();
        let max_steps = request.max_steps();
        let mut builder = ResponseBuilder::new();
        let mut depth: u32 = 0;

        let failure: Option<Error> = 'run: {
            if let Err(err) = prepare_request(&mut request, tools) {
                break 'run Some(err);
            }

            loop {
                depth += 1;
                tracing::debug!(
                    depth,
                    state = ?LoopState::Requesting,
                    provider = provider.name(),
                    "agent loop"
                );

                let (mut payloads, rate_limit) = match provider.open_stream(&request).await {
                    Ok(opened) => opened,
                    Err(err) => break 'run Some(err),
                };

                while let Some(payload) = payloads.next().await {
                    let payload = match payload {
                        Ok(payload) => payload,
                        Err(err) => break 'run Some(err),
                    };
                    match emitter.process(provider.classifier(), &payload, &mut state) {
                        Ok(events) => {
                            for event in events {
                                yield Ok(Emitted::Event(event));
                            }
                        }
                        Err(err) => {
                            tracing::error!(
                                provider = provider.name(),
                                error = %err,
                                "provider stream error"
                            );
                            break 'run Some(err);
                        }
                    }
                }
                drop(payloads);

                let (events, mut turn) = emitter.finish_turn(&mut state);
                for event in events {
                    yield Ok(Emitted::Event(event));
                }
                turn.rate_limit = rate_limit;

                match classify_turn(&turn) {
                    Err(err) => {
                        builder.add_step(build_step(turn, &request, Vec::new(), None));
                        yield Ok(Emitted::Event(emitter.step_finish()));
                        break 'run Some(err);
                    }
                    Ok(TurnOutcome::Finish { structured }) => {
                        builder.add_step(build_step(turn, &request, Vec::new(), structured));
                        yield Ok(Emitted::Event(emitter.step_finish()));
                        break 'run None;
                    }
                    Ok(TurnOutcome::ExecuteTools { calls, structured }) => {
                        tracing::debug!(
                            depth,
                            state = ?LoopState::ExecutingTools,
                            calls = calls.len(),
                            "agent loop"
                        );
                        let results = match executor.execute_all(tools, &calls).await {
                            Ok(results) => results,
                            Err(err) => break 'run Some(err),
                        };
                        for result in &results {
                            yield Ok(Emitted::Event(emitter.tool_result(result, &turn.id)));
                        }

                        let assistant = Message::assistant_with_tool_calls(
                            turn.text.clone(),
                            turn.tool_calls.clone(),
                        )
                        .with_thinking(turn.thinking.clone(), turn.thinking_signature.clone());
                        let structured_present = structured.is_some();
                        builder.add_step(build_step(turn, &request, results.clone(), structured));
                        yield Ok(Emitted::Event(emitter.step_finish()));
                        request.add_message(assistant);
                        request.add_message(Message::tool_results(results));

                        if after_tools(structured_present, depth, max_steps) == LoopState::Done {
                            break 'run None;
                        }
                    }
                }
            }
        };

        let outcome = match failure {
            Some(err) => Err(err),
            None => builder.to_response(decode),
        };
        match outcome {
            Ok(response) => {
                let end = emitter.stream_end(response.finish_reason.clone(), response.usage.clone());
                yield Ok(Emitted::Done(Box::new(response)));
                yield Ok(Emitted::Event(end));
            }
            Err(err) => {
                if let Some(start) = emitter.ensure_started(&mut state) {
                    yield Ok(Emitted::Event(start));
                }
                yield Ok(Emitted::Event(emitter.error(&err)));
                yield Err(err);
            }
        }
        if emitter.violations() > 0 {
            tracing::warn!(
                violations = emitter.violations(),
                "stream finished with ordering violations"
            );
        }
    };

    StreamResult::new(Box::pin(inner))
}

/// Pull-based stream of canonical events for one agent session.
///
/// Once `StreamEnd` has been read, [`response`](StreamResult::response)
/// returns the aggregated result.
pub struct StreamResult<'a> {
    inner: BoxStream<'a, Result<Emitted, Error>>,
    response: Option<Response>,
    finished: bool,
}

impl<'a> StreamResult<'a> {
    fn new(inner: BoxStream<'a, Result<Emitted, Error>>) -> Self {
        Self {
            inner,
            response: None,
            finished: false,
        }
    }

    /// The aggregated response, available after `StreamEnd`.
    pub fn response(&self) -> Option<&Response> {
        self.response.as_ref()
    }

    pub fn into_response(self) -> Option<Response> {
        self.response
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Only the text deltas, as strings. Borrows `self`, so the response is
    /// still reachable once the text stream is dropped.
    pub fn text_stream(&mut self) -> TextDeltaStream<'_, 'a> {
        TextDeltaStream { inner: self }
    }
}

// BoxStream is Unpin, so StreamResult is too.
impl Stream for StreamResult<'_> {
    type Item = Result<StreamEvent, Error>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            match this.inner.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(Emitted::Done(response)))) => {
                    this.response = Some(*response);
                }
                Poll::Ready(Some(Ok(Emitted::Event(event)))) => {
                    return Poll::Ready(Some(Ok(event)));
                }
                Poll::Ready(Some(Err(err))) => return Poll::Ready(Some(Err(err))),
                Poll::Ready(None) => {
                    this.finished = true;
                    return Poll::Ready(None);
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

/// Text deltas of a [`StreamResult`].
pub struct TextDeltaStream<'b, 'a: 'b> {
    inner: &'b mut StreamResult<'a>,
}

impl<'b, 'a: 'b> Stream for TextDeltaStream<'b, 'a> {
    type Item = Result<String, Error>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            match Pin::new(&mut *this.inner).poll_next(cx) {
                Poll::Ready(Some(Ok(event))) => {
                    if let Some(delta) = event.text_delta() {
                        return Poll::Ready(Some(Ok(delta.to_string())));
                    }
                }
                Poll::Ready(Some(Err(err))) => return Poll::Ready(Some(Err(err))),
                Poll::Ready(None) => return Poll::Ready(None),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
