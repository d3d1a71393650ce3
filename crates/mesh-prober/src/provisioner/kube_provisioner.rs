//! Kubernetes-backed resource provisioner.

use super::{resolve_not_found, DeleteOutcome, ProvisionError, ResourceApi, ResourceProvisioner};
use crate::kube_client::ClientPool;
use crate::models::AccessHandle;
use k8s_openapi::api::networking::v1::NetworkPolicy;
use kube::api::{Api, DeleteParams, DynamicObject, ListParams, PostParams};
use kube::Client;
use tracing::{debug, instrument};

/// Provisioner talking to each cluster's API server.
#[derive(Clone)]
pub struct KubeProvisioner {
    pool: ClientPool,
}

impl KubeProvisioner {
    pub fn new(pool: ClientPool) -> Self {
        Self { pool }
    }

    fn client(&self, handle: &AccessHandle) -> Result<Client, ProvisionError> {
        self.pool
            .client(handle)
            .map_err(|_| ProvisionError::UnknownCluster(handle.cluster().to_string()))
    }

    fn dynamic(
        &self,
        api: &ResourceApi,
        handle: &AccessHandle,
        namespace: Option<&str>,
    ) -> Result<Api<DynamicObject>, ProvisionError> {
        let client = self.client(handle)?;
        let resource = api.api_resource();
        Ok(match namespace {
            Some(ns) => Api::namespaced_with(client, ns, &resource),
            None => Api::all_with(client, &resource),
        })
    }

    fn network_policies(
        &self,
        handle: &AccessHandle,
        namespace: Option<&str>,
    ) -> Result<Api<NetworkPolicy>, ProvisionError> {
        let client = self.client(handle)?;
        Ok(match namespace {
            Some(ns) => Api::namespaced(client, ns),
            None => Api::all(client),
        })
    }
}

fn api_error(handle: &AccessHandle) -> impl FnOnce(kube::Error) -> ProvisionError + '_ {
    move |source| ProvisionError::Api {
        cluster: handle.cluster().to_string(),
        source,
    }
}

fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(e) if e.code == 404)
}

#[async_trait::async_trait]
impl ResourceProvisioner for KubeProvisioner {
    #[instrument(skip_all, name = "mp.provisioner.create", fields(cluster = %handle.cluster(), api = %api, namespace = %namespace, name = %name))]
    async fn create(
        &self,
        api: &ResourceApi,
        handle: &AccessHandle,
        namespace: &str,
        name: &str,
        body: &serde_json::Value,
    ) -> Result<(), ProvisionError> {
        let params = PostParams::default();
        match api {
            ResourceApi::NetworkPolicy => {
                let policy: NetworkPolicy = serde_json::from_value(body.clone())?;
                self.network_policies(handle, Some(namespace))?
                    .create(&params, &policy)
                    .await
                    .map_err(api_error(handle))?;
            }
            ResourceApi::Custom { .. } => {
                let object: DynamicObject = serde_json::from_value(body.clone())?;
                self.dynamic(api, handle, Some(namespace))?
                    .create(&params, &object)
                    .await
                    .map_err(api_error(handle))?;
            }
        }
        debug!(target: "mp.provisioner", "Resource created");
        Ok(())
    }

    #[instrument(skip_all, name = "mp.provisioner.delete", fields(cluster = %handle.cluster(), api = %api, namespace = %namespace, name = %name))]
    async fn delete(
        &self,
        api: &ResourceApi,
        handle: &AccessHandle,
        namespace: &str,
        name: &str,
        strict: bool,
    ) -> Result<DeleteOutcome, ProvisionError> {
        let params = DeleteParams::default();
        let result = match api {
            ResourceApi::NetworkPolicy => self
                .network_policies(handle, Some(namespace))?
                .delete(name, &params)
                .await
                .map(|_| ()),
            ResourceApi::Custom { .. } => self
                .dynamic(api, handle, Some(namespace))?
                .delete(name, &params)
                .await
                .map(|_| ()),
        };

        match result {
            Ok(()) => {
                debug!(target: "mp.provisioner", "Resource deleted");
                Ok(DeleteOutcome::Deleted)
            }
            Err(e) if is_not_found(&e) => {
                debug!(target: "mp.provisioner", strict, "Resource already absent");
                resolve_not_found(api, namespace, name, strict)
            }
            Err(e) => Err(api_error(handle)(e)),
        }
    }

    async fn get(
        &self,
        api: &ResourceApi,
        handle: &AccessHandle,
        namespace: &str,
        name: &str,
    ) -> Result<serde_json::Value, ProvisionError> {
        let found = match api {
            ResourceApi::NetworkPolicy => self
                .network_policies(handle, Some(namespace))?
                .get(name)
                .await
                .map(serde_json::to_value),
            ResourceApi::Custom { .. } => self
                .dynamic(api, handle, Some(namespace))?
                .get(name)
                .await
                .map(serde_json::to_value),
        };

        match found {
            Ok(value) => Ok(value?),
            Err(e) if is_not_found(&e) => Err(ProvisionError::NotFound {
                api: api.to_string(),
                namespace: namespace.to_string(),
                name: name.to_string(),
            }),
            Err(e) => Err(api_error(handle)(e)),
        }
    }

    async fn list(
        &self,
        api: &ResourceApi,
        handle: &AccessHandle,
        namespace: Option<&str>,
    ) -> Result<Vec<serde_json::Value>, ProvisionError> {
        let params = ListParams::default();
        let values = match api {
            ResourceApi::NetworkPolicy => self
                .network_policies(handle, namespace)?
                .list(&params)
                .await
                .map_err(api_error(handle))?
                .items
                .into_iter()
                .map(serde_json::to_value)
                .collect::<Result<Vec<_>, _>>()?,
            ResourceApi::Custom { .. } => self
                .dynamic(api, handle, namespace)?
                .list(&params)
                .await
                .map_err(api_error(handle))?
                .items
                .into_iter()
                .map(serde_json::to_value)
                .collect::<Result<Vec<_>, _>>()?,
        };
        Ok(values)
    }
}
