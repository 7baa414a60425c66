//! Event handlers as Tower services.
//!
//! Any `tower::Service` taking an [`InvokeEvent`](crate::InvokeEvent) or a
//! [`ShutdownEvent`](crate::ShutdownEvent) can serve as a handler. Closures
//! are adapted with [`tower::service_fn`].

use crate::error::BoxError;
use tower::util::BoxService;
use tower::{Service, ServiceExt};

/// A type-erased handler for events of type `E`.
pub type EventHandler<E> = BoxService<E, (), BoxError>;

pub(crate) fn boxed<S, E>(service: S) -> EventHandler<E>
where
    S: Service<E, Response = ()> + Send + 'static,
    S::Error: Into<BoxError>,
    S::Future: Send + 'static,
    E: 'static,
{
    BoxService::new(service.map_err(|e: S::Error| -> BoxError { e.into() }))
}

/// Waits for the handler to be ready and calls it once.
pub(crate) async fn dispatch<E>(handler: &mut EventHandler<E>, event: E) -> Result<(), BoxError> {
    handler.ready().await?.call(event).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tower::service_fn;

    #[tokio::test]
    async fn test_dispatch_calls_service() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let mut handler = boxed(service_fn(move |n: usize| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(n, Ordering::SeqCst);
                Ok::<_, BoxError>(())
            }
        }));

        dispatch(&mut handler, 2).await.unwrap();
        dispatch(&mut handler, 3).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_dispatch_propagates_error() {
        let mut handler = boxed(service_fn(|_: ()| async {
            Err::<(), _>(std::io::Error::other("boom"))
        }));

        let err = dispatch(&mut handler, ()).await.unwrap_err();
        assert_eq!(err.to_string(), "boom");
    }
}
