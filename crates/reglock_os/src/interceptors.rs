#![forbid(unsafe_code)]

use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use tracing::debug;

use reglock_engines::lock_enforcer::SettingInterceptor;

use crate::host::InterceptorHost;

/// Removes the installed setting interceptor for as long as it lives and puts
/// it back on drop. The host stays reachable through `Deref`.
pub struct InterceptorSuspension<'h, H: InterceptorHost + ?Sized> {
    host: &'h mut H,
    suspended: Option<Arc<dyn SettingInterceptor>>,
}

impl<'h, H: InterceptorHost + ?Sized> InterceptorSuspension<'h, H> {
    pub fn begin(host: &'h mut H) -> Self {
        let suspended = host.remove_setting_interceptor();
        if suspended.is_some() {
            debug!("setting interceptor suspended");
        }
        Self { host, suspended }
    }

    pub fn was_installed(&self) -> bool {
        self.suspended.is_some()
    }

    /// Ends the suspension without reinstalling.
    pub fn release(mut self) -> Option<Arc<dyn SettingInterceptor>> {
        self.suspended.take()
    }
}

impl<H: InterceptorHost + ?Sized> Deref for InterceptorSuspension<'_, H> {
    type Target = H;

    fn deref(&self) -> &H {
        &*self.host
    }
}

impl<H: InterceptorHost + ?Sized> DerefMut for InterceptorSuspension<'_, H> {
    fn deref_mut(&mut self) -> &mut H {
        &mut *self.host
    }
}

impl<H: InterceptorHost + ?Sized> Drop for InterceptorSuspension<'_, H> {
    fn drop(&mut self) {
        if let Some(interceptor) = self.suspended.take() {
            self.host.install_setting_interceptor(interceptor);
            debug!("setting interceptor reinstalled");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::HostSettings;
    use crate::in_memory_host::InMemoryHost;
    use reglock_engines::lock_enforcer::{LockEnforcer, LockEnforcerConfig};
    use reglock_kernel_contracts::settings::SETTING_USERS_CAN_REGISTER;
    use serde_json::json;

    fn host_with_enforcer() -> InMemoryHost {
        let mut host = InMemoryHost::new_in_memory();
        host.seed_setting(SETTING_USERS_CAN_REGISTER, json!("1"));
        let enforcer = LockEnforcer::new(LockEnforcerConfig::mvp_v1()).unwrap();
        host.install_setting_interceptor(Arc::new(enforcer));
        host
    }

    #[test]
    fn at_interceptors_01_suspension_exposes_stored_value_and_reinstalls() {
        let mut host = host_with_enforcer();
        {
            let mut guard = InterceptorSuspension::begin(&mut host);
            assert!(guard.was_installed());
            assert_eq!(
                guard.read_setting(SETTING_USERS_CAN_REGISTER).unwrap(),
                Some(json!("1"))
            );
            guard
                .write_setting(SETTING_USERS_CAN_REGISTER, json!(0))
                .unwrap();
        }
        assert!(host.has_setting_interceptor());
        assert_eq!(
            host.read_setting(SETTING_USERS_CAN_REGISTER).unwrap(),
            Some(json!(false))
        );
    }

    #[test]
    fn at_interceptors_02_release_leaves_interceptor_removed() {
        let mut host = host_with_enforcer();
        let released = InterceptorSuspension::begin(&mut host).release();
        assert!(released.is_some());
        assert!(!host.has_setting_interceptor());
    }

    #[test]
    fn at_interceptors_03_writes_fail_while_interceptor_is_installed() {
        let mut host = host_with_enforcer();
        assert!(host
            .write_setting(SETTING_USERS_CAN_REGISTER, json!(1))
            .is_err());
    }
}
