//! Bound computations.
//!
//! Decorating a computation yields a handle that derives its key from the
//! call arguments and exposes the cache operations for that key. Methods are
//! decorated once per type; [`MemoizedMethod::on`] scopes a handle to one
//! instance.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use time::OffsetDateTime;

use super::engine::Cache;
use super::error::CacheError;
use super::identity::{Receiver, partition};
use super::keys::{Arg, Args, Signature, derive_key};
use super::options::CallOptions;

/// Cache operations of a bound computation.
///
/// Implementors provide key derivation and invocation; everything else is
/// shared. Per-call options are layered over the decoration-time defaults.
pub trait CachedCall {
    type Output: Clone + Send + Sync + 'static;
    type Error: From<CacheError>;

    fn cache(&self) -> &Cache;

    /// Options fixed at decoration time.
    fn defaults(&self) -> &CallOptions;

    /// Canonical key for a call with `args`, before namespacing.
    fn key(&self, args: &Args) -> Result<String, CacheError>;

    /// Run the underlying computation, bypassing the cache.
    fn invoke(&self, args: &Args) -> Result<Self::Output, Self::Error>;

    fn call(&self, args: Args) -> Result<Self::Output, Self::Error> {
        self.call_with(args, &CallOptions::new())
    }

    fn call_with(&self, args: Args, options: &CallOptions) -> Result<Self::Output, Self::Error> {
        let key = self.key(&args)?;
        let options = self.merged(options);
        self.cache().get(&key, || self.invoke(&args), &options)
    }

    fn delete(&self, args: Args, options: &CallOptions) -> Result<(), CacheError> {
        self.cache().delete(&self.key(&args)?, &self.merged(options))
    }

    fn expire(
        &self,
        args: Args,
        maxage: Duration,
        options: &CallOptions,
    ) -> Result<(), CacheError> {
        self.cache()
            .expire(&self.key(&args)?, maxage, &self.merged(options))
    }

    fn expire_at(
        &self,
        args: Args,
        at: OffsetDateTime,
        options: &CallOptions,
    ) -> Result<(), CacheError> {
        self.cache()
            .expire_at(&self.key(&args)?, at, &self.merged(options))
    }

    fn ttl(&self, args: Args, options: &CallOptions) -> Result<Option<Duration>, CacheError> {
        self.cache().ttl(&self.key(&args)?, &self.merged(options))
    }

    fn exists(&self, args: Args, options: &CallOptions) -> Result<bool, CacheError> {
        self.cache().exists(&self.key(&args)?, &self.merged(options))
    }

    fn etag(&self, args: Args, options: &CallOptions) -> Result<Option<String>, CacheError> {
        self.cache().etag(&self.key(&args)?, &self.merged(options))
    }

    /// A handle with the leading positional arguments (and any keywords)
    /// of `args` fixed.
    fn bind(&self, args: Args) -> Bound<'_, Self>
    where
        Self: Sized,
    {
        Bound {
            inner: self,
            fixed: args,
        }
    }

    #[doc(hidden)]
    fn merged(&self, options: &CallOptions) -> CallOptions {
        options.clone().over(self.defaults())
    }
}

// ============================================================================
// Decoration
// ============================================================================

/// Collects a master key and default options before binding a computation.
#[derive(Debug, Clone)]
pub struct Decorator {
    cache: Cache,
    master_key: Vec<Arg>,
    options: CallOptions,
}

impl Decorator {
    pub(crate) fn new(cache: Cache) -> Self {
        Self {
            cache,
            master_key: Vec::new(),
            options: CallOptions::new(),
        }
    }

    /// Prefix every derived key with these literals.
    pub fn master_key<I, A>(mut self, parts: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<Arg>,
    {
        self.master_key = parts.into_iter().map(Into::into).collect();
        self
    }

    /// Decoration-time defaults; per-call options take precedence.
    pub fn options(mut self, options: CallOptions) -> Self {
        self.options = options;
        self
    }

    pub fn memoize<F, T, E>(self, signature: Signature, function: F) -> Memoized<F, T, E>
    where
        F: Fn(&Args) -> Result<T, E>,
        T: Clone + Send + Sync + 'static,
        E: From<CacheError>,
    {
        Memoized {
            cache: self.cache,
            signature,
            master_key: self.master_key,
            defaults: self.options,
            function,
            _marker: PhantomData,
        }
    }

    /// Decorate a method of `R`; see [`MemoizedMethod::on`].
    pub fn memoize_method<R, F, T, E>(
        self,
        signature: Signature,
        function: F,
    ) -> MemoizedMethod<R, F, T, E>
    where
        R: Receiver,
        F: Fn(&R, &Args) -> Result<T, E>,
        T: Clone + Send + Sync + 'static,
        E: From<CacheError>,
    {
        MemoizedMethod {
            cache: self.cache,
            signature,
            master_key: self.master_key,
            defaults: self.options,
            function,
            _marker: PhantomData,
        }
    }
}

// ============================================================================
// Free computations
// ============================================================================

/// A computation bound to a cache.
pub struct Memoized<F, T, E> {
    cache: Cache,
    signature: Signature,
    master_key: Vec<Arg>,
    defaults: CallOptions,
    function: F,
    _marker: PhantomData<fn() -> (T, E)>,
}

impl<F, T, E> Memoized<F, T, E> {
    pub fn signature(&self) -> &Signature {
        &self.signature
    }
}

impl<F, T, E> CachedCall for Memoized<F, T, E>
where
    F: Fn(&Args) -> Result<T, E>,
    T: Clone + Send + Sync + 'static,
    E: From<CacheError>,
{
    type Output = T;
    type Error = E;

    fn cache(&self) -> &Cache {
        &self.cache
    }

    fn defaults(&self) -> &CallOptions {
        &self.defaults
    }

    fn key(&self, args: &Args) -> Result<String, CacheError> {
        Ok(derive_key(&self.master_key, None, &self.signature, args)?)
    }

    fn invoke(&self, args: &Args) -> Result<T, E> {
        (self.function)(args)
    }
}

impl<F, T, E> fmt::Debug for Memoized<F, T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Memoized")
            .field("signature", &self.signature)
            .field("master_key", &self.master_key)
            .field("defaults", &self.defaults)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Methods
// ============================================================================

/// A method bound to a cache, not yet tied to an instance.
pub struct MemoizedMethod<R, F, T, E> {
    cache: Cache,
    signature: Signature,
    master_key: Vec<Arg>,
    defaults: CallOptions,
    function: F,
    _marker: PhantomData<fn(&R) -> (T, E)>,
}

impl<R, F, T, E> MemoizedMethod<R, F, T, E>
where
    R: Receiver,
    F: Fn(&R, &Args) -> Result<T, E>,
    T: Clone + Send + Sync + 'static,
    E: From<CacheError>,
{
    /// Handle scoped to `instance`.
    ///
    /// The partition comes from the `id_field` attribute when one resolves
    /// for the decoration-time options and region, else from the instance's
    /// identity. It is fixed for the handle's lifetime, so an `id_field`
    /// passed later to `call_with` has no effect; use [`Self::on_with`].
    pub fn on(&self, instance: &Arc<R>) -> Result<MethodCall<'_, R, F, T, E>, CacheError> {
        self.on_with(instance, &CallOptions::new())
    }

    /// Like [`Self::on`], with `options` layered over the decoration-time
    /// defaults when resolving `id_field`.
    pub fn on_with(
        &self,
        instance: &Arc<R>,
        options: &CallOptions,
    ) -> Result<MethodCall<'_, R, F, T, E>, CacheError> {
        let merged = self.cache.regions().merge(&options.clone().over(&self.defaults))?;
        let partition = partition(
            self.cache.identities(),
            instance,
            merged.id_field.as_deref(),
        )?;
        Ok(MethodCall {
            method: self,
            instance: Arc::clone(instance),
            partition,
        })
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }
}

impl<R, F, T, E> fmt::Debug for MemoizedMethod<R, F, T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoizedMethod")
            .field("signature", &self.signature)
            .field("master_key", &self.master_key)
            .field("defaults", &self.defaults)
            .finish_non_exhaustive()
    }
}

/// A method handle scoped to one instance.
pub struct MethodCall<'m, R, F, T, E> {
    method: &'m MemoizedMethod<R, F, T, E>,
    instance: Arc<R>,
    partition: String,
}

impl<R, F, T, E> MethodCall<'_, R, F, T, E> {
    /// Key segment isolating this instance.
    pub fn partition(&self) -> &str {
        &self.partition
    }

    pub fn instance(&self) -> &Arc<R> {
        &self.instance
    }
}

impl<R, F, T, E> CachedCall for MethodCall<'_, R, F, T, E>
where
    R: Receiver,
    F: Fn(&R, &Args) -> Result<T, E>,
    T: Clone + Send + Sync + 'static,
    E: From<CacheError>,
{
    type Output = T;
    type Error = E;

    fn cache(&self) -> &Cache {
        &self.method.cache
    }

    fn defaults(&self) -> &CallOptions {
        &self.method.defaults
    }

    fn key(&self, args: &Args) -> Result<String, CacheError> {
        Ok(derive_key(
            &self.method.master_key,
            Some(&self.partition),
            &self.method.signature,
            args,
        )?)
    }

    fn invoke(&self, args: &Args) -> Result<T, E> {
        (self.method.function)(&self.instance, args)
    }
}

// ============================================================================
// Partial application
// ============================================================================

/// A bound computation with some arguments fixed.
///
/// Fixed positionals come first; fixed keywords apply unless the call
/// passes the same keyword.
pub struct Bound<'a, C> {
    inner: &'a C,
    fixed: Args,
}

impl<C> Bound<'_, C> {
    fn complete(&self, args: &Args) -> Args {
        let mut complete = args.prefixed(&self.fixed.positional);
        for (name, value) in &self.fixed.keywords {
            if complete.keyword(name).is_none() {
                complete.keywords.push((name.clone(), value.clone()));
            }
        }
        complete
    }
}

impl<C: CachedCall> CachedCall for Bound<'_, C> {
    type Output = C::Output;
    type Error = C::Error;

    fn cache(&self) -> &Cache {
        self.inner.cache()
    }

    fn defaults(&self) -> &CallOptions {
        self.inner.defaults()
    }

    fn key(&self, args: &Args) -> Result<String, CacheError> {
        self.inner.key(&self.complete(args))
    }

    fn invoke(&self, args: &Args) -> Result<C::Output, C::Error> {
        self.inner.invoke(&self.complete(args))
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;
    use crate::args;
    use crate::cache::store::{MemoryStore, Store};

    fn cache() -> Cache {
        Cache::new(Arc::new(MemoryStore::new()) as Arc<dyn Store>)
    }

    fn add() -> Signature {
        Signature::new("tests", "add").params(["a", "b"]).defaults([10])
    }

    #[test]
    fn positional_and_keyword_calls_share_an_entry() {
        let cache = cache();
        let calls = Cell::new(0);
        let memoized = cache.memoize(add(), |args: &Args| {
            calls.set(calls.get() + 1);
            let a = args.get(0).and_then(Arg::as_int).unwrap_or_default();
            Ok::<_, CacheError>(a)
        });

        assert_eq!(memoized.call(args![1, 10]).expect("miss"), 1);
        assert_eq!(memoized.call(args![1]).expect("hit"), 1);
        assert_eq!(memoized.call(args![].kw("b", 10).kw("a", 1)).expect("hit"), 1);
        assert_eq!(calls.get(), 1);
        assert_eq!(
            memoized.key(&args![1]).expect("key"),
            "tests.add(1, 10)"
        );
    }

    #[test]
    fn master_key_prefixes_key() {
        let memoized = cache()
            .decorator()
            .master_key(["key", "sub"])
            .memoize(add(), |_: &Args| Ok::<_, CacheError>(()));
        assert_eq!(
            memoized.key(&args![1, 2]).expect("key"),
            "'key','sub':tests.add(1, 2)"
        );
    }

    #[test]
    fn per_call_options_override_decoration_defaults() {
        let cache = cache();
        let memoized = cache
            .decorator()
            .options(CallOptions::new().namespace("deco"))
            .memoize(add(), |_: &Args| Ok::<_, CacheError>(1_u8));

        memoized.call(args![1]).expect("miss");
        assert!(memoized.exists(args![1], &CallOptions::new()).expect("exists"));
        assert!(
            !memoized
                .exists(args![1], &CallOptions::new().namespace("other"))
                .expect("exists")
        );
        assert!(
            cache
                .exists("tests.add(1, 10)", &CallOptions::new().namespace("deco"))
                .expect("exists")
        );
    }

    #[test]
    fn computation_errors_propagate() {
        #[derive(Debug, PartialEq)]
        enum AppError {
            Cache(String),
            Boom,
        }

        impl From<CacheError> for AppError {
            fn from(err: CacheError) -> Self {
                AppError::Cache(err.to_string())
            }
        }

        let memoized = cache().memoize(add(), |_: &Args| Err::<u8, _>(AppError::Boom));
        assert_eq!(memoized.call(args![1]), Err(AppError::Boom));
        assert!(!memoized.exists(args![1], &CallOptions::new()).expect("exists"));
        assert!(matches!(
            memoized.call(args![1, 2, 3]),
            Err(AppError::Cache(_))
        ));
    }

    #[test]
    fn bind_fixes_leading_arguments() {
        let memoized = cache().memoize(add(), |args: &Args| {
            let a = args.get(0).and_then(Arg::as_int).unwrap_or_default();
            let b = args
                .get(1)
                .or_else(|| args.keyword("b"))
                .and_then(Arg::as_int)
                .unwrap_or(10);
            Ok::<_, CacheError>(a + b)
        });

        let bound = memoized.bind(args![5]);
        assert_eq!(bound.call(args![1]).expect("call"), 6);
        assert_eq!(bound.key(&args![1]).expect("key"), "tests.add(5, 1)");
        assert!(memoized.exists(args![5, 1], &CallOptions::new()).expect("exists"));
    }

    struct Account {
        id: Option<i64>,
        balance: i64,
    }

    impl Receiver for Account {
        fn attribute(&self, name: &str) -> Option<Arg> {
            match name {
                "id" => self.id.map(Arg::from),
                _ => None,
            }
        }
    }

    fn balance() -> Signature {
        Signature::new("tests.Account", "balance")
    }

    #[test]
    fn methods_are_scoped_per_instance() {
        let cache = cache();
        let method = cache
            .decorator()
            .memoize_method(balance(), |account: &Account, _: &Args| {
                Ok::<_, CacheError>(account.balance)
            });

        let first = Arc::new(Account { id: None, balance: 1 });
        let second = Arc::new(Account { id: None, balance: 2 });

        let first_call = method.on(&first).expect("first");
        let second_call = method.on(&second).expect("second");
        assert_ne!(first_call.partition(), second_call.partition());
        assert_eq!(first_call.call(args![]).expect("first"), 1);
        assert_eq!(second_call.call(args![]).expect("second"), 2);
    }

    #[test]
    fn id_field_shares_entries_between_equal_ids() {
        let cache = cache();
        let method = cache
            .decorator()
            .options(CallOptions::new().id_field("id"))
            .memoize_method(balance(), |account: &Account, _: &Args| {
                Ok::<_, CacheError>(account.balance)
            });

        let original = Arc::new(Account { id: Some(7), balance: 100 });
        let copy = Arc::new(Account { id: Some(7), balance: 0 });

        let call = method.on(&original).expect("on");
        assert_eq!(call.key(&args![]).expect("key"), "id=7:tests.Account.balance()");
        assert_eq!(call.call(args![]).expect("miss"), 100);
        assert_eq!(method.on(&copy).expect("on").call(args![]).expect("hit"), 100);
    }

    #[test]
    fn id_field_can_be_chosen_per_handle() {
        let cache = cache();
        let method = cache
            .decorator()
            .memoize_method(balance(), |account: &Account, _: &Args| {
                Ok::<_, CacheError>(account.balance)
            });
        let account = Arc::new(Account { id: Some(3), balance: 9 });

        assert!(method.on(&account).expect("on").partition().starts_with('#'));
        let call = method
            .on_with(&account, &CallOptions::new().id_field("id"))
            .expect("on_with");
        assert_eq!(call.partition(), "id=3");
        assert_eq!(call.call(args![]).expect("call"), 9);
    }
}
