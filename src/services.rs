//! Dependency-injection registry (§4.7), grounded on
//! `original_source/framework/include/blaze/di.h`'s `ServiceDescriptor`
//! (`provide`/`provide_transient`/`resolve`, per-descriptor mutex guarding
//! first construction). Reimplemented with `TypeId` + `Box<dyn Any + Send +
//! Sync>` and a `tokio::sync::OnceCell` per descriptor rather than
//! `std::any` + `std::mutex`, the idiomatic async equivalent (§2 A-note).

use std::{
    any::{Any, TypeId},
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex},
};
use tokio::sync::OnceCell;

type AnyArc = Arc<dyn Any + Send + Sync>;
type Factory = Arc<dyn Fn(&ServiceProvider) -> BoxFuture<AnyArc> + Send + Sync>;
type BoxFuture<T> = std::pin::Pin<Box<dyn std::future::Future<Output = T> + Send>>;

/// Failures resolving or registering a service (§7 "missing required
/// service raises 500 ... or at first request").
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("service not registered: {0}")]
    NotRegistered(&'static str),
    #[error("dependency cycle detected while constructing {0}")]
    Cycle(&'static str),
    #[error("registration attempted after the server has started")]
    RegistrationClosed,
}

enum Lifetime {
    Singleton(OnceCell<AnyArc>),
    Transient,
}

struct Descriptor {
    type_name: &'static str,
    factory: Factory,
    lifetime: Lifetime,
}

/// Holds every registered service descriptor (§4.7). Built up via
/// [`ServiceProvider::provide`]/[`ServiceProvider::provide_transient`] during
/// startup, then frozen (`close()`) before the reactor begins accepting
/// connections; further registration attempts fail.
pub struct ServiceProvider {
    descriptors: HashMap<TypeId, Descriptor>,
    closed: bool,
    in_progress: Mutex<HashSet<TypeId>>,
}

impl ServiceProvider {
    pub fn new() -> Self {
        Self {
            descriptors: HashMap::new(),
            closed: false,
            in_progress: Mutex::new(HashSet::new()),
        }
    }

    /// Registers `T` as a singleton, constructed at most once via `factory`
    /// and cached for the provider's lifetime.
    pub fn provide<T, F, Fut>(&mut self, factory: F) -> Result<(), ServiceError>
    where
        T: Any + Send + Sync + 'static,
        F: Fn(&ServiceProvider) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = T> + Send + 'static,
    {
        self.insert::<T, F, Fut>(factory, true)
    }

    /// Registers `T` as transient: `factory` runs on every
    /// [`ServiceProvider::resolve`] call.
    pub fn provide_transient<T, F, Fut>(&mut self, factory: F) -> Result<(), ServiceError>
    where
        T: Any + Send + Sync + 'static,
        F: Fn(&ServiceProvider) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = T> + Send + 'static,
    {
        self.insert::<T, F, Fut>(factory, false)
    }

    /// Registers an already-constructed singleton instance directly,
    /// matching `di.h`'s `provide(std::shared_ptr<T>)` overload.
    pub fn provide_instance<T>(&mut self, instance: T) -> Result<(), ServiceError>
    where
        T: Any + Send + Sync + 'static,
    {
        if self.closed {
            return Err(ServiceError::RegistrationClosed);
        }
        let cell = OnceCell::new();
        // infallible: freshly constructed, empty cell
        let _ = cell.set(Arc::new(instance) as AnyArc);
        self.descriptors.insert(
            TypeId::of::<T>(),
            Descriptor {
                type_name: std::any::type_name::<T>(),
                factory: Arc::new(|_sp| Box::pin(async { unreachable!("instance already set") })),
                lifetime: Lifetime::Singleton(cell),
            },
        );
        Ok(())
    }

    fn insert<T, F, Fut>(&mut self, factory: F, singleton: bool) -> Result<(), ServiceError>
    where
        T: Any + Send + Sync + 'static,
        F: Fn(&ServiceProvider) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = T> + Send + 'static,
    {
        if self.closed {
            return Err(ServiceError::RegistrationClosed);
        }
        let factory: Factory = Arc::new(move |sp| {
            let fut = factory(sp);
            Box::pin(async move { Arc::new(fut.await) as AnyArc })
        });
        let lifetime = if singleton {
            Lifetime::Singleton(OnceCell::new())
        } else {
            Lifetime::Transient
        };
        self.descriptors.insert(
            TypeId::of::<T>(),
            Descriptor {
                type_name: std::any::type_name::<T>(),
                factory,
                lifetime,
            },
        );
        Ok(())
    }

    /// Closes registration; called once by [`crate::App`] right before the
    /// reactor starts accepting connections (§4.7 "registration after the
    /// server has started is not supported").
    pub(crate) fn close(&mut self) {
        self.closed = true;
    }

    /// Whether `T` has a registered descriptor.
    pub fn has<T: Any + Send + Sync + 'static>(&self) -> bool {
        self.descriptors.contains_key(&TypeId::of::<T>())
    }

    /// Resolves `T`, constructing it (and any of its dependencies, via
    /// nested `resolve` calls inside the factory) on demand. Singletons are
    /// cached after first construction; transients run their factory every
    /// call. A cycle — `T`'s own factory transitively resolving `T` again —
    /// is reported as [`ServiceError::Cycle`] rather than deadlocking.
    pub async fn resolve<T: Any + Send + Sync + 'static>(&self) -> Result<Arc<T>, ServiceError> {
        let type_id = TypeId::of::<T>();
        let descriptor = self
            .descriptors
            .get(&type_id)
            .ok_or(ServiceError::NotRegistered(std::any::type_name::<T>()))?;

        {
            let mut in_progress = self.in_progress.lock().unwrap();
            if !in_progress.insert(type_id) {
                return Err(ServiceError::Cycle(descriptor.type_name));
            }
        }
        let guard = InProgressGuard {
            provider: self,
            type_id,
        };

        let any = match &descriptor.lifetime {
            Lifetime::Singleton(cell) => {
                cell.get_or_try_init(|| async { Ok::<_, ServiceError>((descriptor.factory)(self).await) })
                    .await?
                    .clone()
            }
            Lifetime::Transient => (descriptor.factory)(self).await,
        };
        drop(guard);

        any.downcast::<T>()
            .map_err(|_| ServiceError::NotRegistered(std::any::type_name::<T>()))
    }
}

impl Default for ServiceProvider {
    fn default() -> Self {
        Self::new()
    }
}

/// Removes `type_id` from the in-progress set on drop, including on the
/// error/panic-unwind path out of `resolve`.
struct InProgressGuard<'a> {
    provider: &'a ServiceProvider,
    type_id: TypeId,
}

impl Drop for InProgressGuard<'_> {
    fn drop(&mut self) {
        self.provider.in_progress.lock().unwrap().remove(&self.type_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Repo {
        label: &'static str,
    }

    #[tokio::test]
    async fn singleton_constructed_once() {
        let counter = Arc::new(std::sync::atomic::AtomicU32::new(0));
        let mut sp = ServiceProvider::new();
        let c = counter.clone();
        sp.provide::<Repo, _, _>(move |_sp| {
            let c = c.clone();
            async move {
                c.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                Repo { label: "db" }
            }
        })
        .unwrap();

        let a = sp.resolve::<Repo>().await.unwrap();
        let b = sp.resolve::<Repo>().await.unwrap();
        assert_eq!(a.label, "db");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(counter.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn transient_constructed_every_time() {
        let counter = Arc::new(std::sync::atomic::AtomicU32::new(0));
        let mut sp = ServiceProvider::new();
        let c = counter.clone();
        sp.provide_transient::<Repo, _, _>(move |_sp| {
            let c = c.clone();
            async move {
                c.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                Repo { label: "t" }
            }
        })
        .unwrap();

        sp.resolve::<Repo>().await.unwrap();
        sp.resolve::<Repo>().await.unwrap();
        assert_eq!(counter.load(std::sync::atomic::Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn missing_service_errors() {
        let sp = ServiceProvider::new();
        let err = sp.resolve::<Repo>().await.unwrap_err();
        assert!(matches!(err, ServiceError::NotRegistered(_)));
    }

    #[tokio::test]
    async fn registration_after_close_fails() {
        let mut sp = ServiceProvider::new();
        sp.close();
        let err = sp
            .provide::<Repo, _, _>(|_sp| async { Repo { label: "x" } })
            .unwrap_err();
        assert!(matches!(err, ServiceError::RegistrationClosed));
    }

    #[tokio::test]
    async fn provide_instance_resolves_directly() {
        let mut sp = ServiceProvider::new();
        sp.provide_instance(Repo { label: "instance" }).unwrap();
        let r = sp.resolve::<Repo>().await.unwrap();
        assert_eq!(r.label, "instance");
    }
}
