//! Agent-facing identifier registration.
//!
//! Application codes and service names are registered without waiting: a
//! name still being allocated is left out of the reply and the agent asks
//! again on its next round. Instances are registered inline and always
//! answered with their identifier.

use crate::server::{
    node::Node,
    telemetry::{increment_register_errors, increment_register_requests, record_register_duration},
};
use collector_register::{OsInfo, now_millis};
use collector_tonic_core::{
    Error, Result as HandlerResult,
    proto::{
        Ack, ApplicationMapping, Applications, HeartbeatRequest, InstanceMapping, InstanceRequest,
        KeyWithIntegerValue, RecoverRequest, ServiceNameElement, ServiceNameMapping,
        ServiceNameMappingElement, ServiceNames, register_server::Register,
    },
};
use std::time::Instant;
use tonic::{Request, Response, Status};

#[derive(Clone)]
pub struct RegisterHandler {
    node: Node,
}

impl RegisterHandler {
    pub fn new(node: Node) -> Self {
        Self { node }
    }

    fn ensure_running(&self) -> HandlerResult<()> {
        if self.node.is_shutting_down() {
            return Err(Error::ServiceShutdown);
        }
        Ok(())
    }

    async fn handle_register_application(&self, req: Applications) -> HandlerResult<ApplicationMapping> {
        self.ensure_running()?;
        if req.application_codes.is_empty() {
            return Err(invalid("application_codes must not be empty"));
        }

        let applications = &self.node.services.applications;
        let mut mapping = Vec::with_capacity(req.application_codes.len());
        for code in req.application_codes {
            if code.is_empty() {
                return Err(invalid("application code must not be empty"));
            }
            let id = applications.get_or_create_application_id(&code).await?;
            if id != 0 {
                mapping.push(KeyWithIntegerValue {
                    key: code,
                    value: id,
                });
            }
        }

        Ok(ApplicationMapping {
            applications: mapping,
        })
    }

    async fn handle_register_instance(&self, req: InstanceRequest) -> HandlerResult<InstanceMapping> {
        self.ensure_running()?;
        if req.application_id == 0 {
            return Err(invalid("application_id must not be 0"));
        }
        if req.agent_uuid.is_empty() {
            return Err(invalid("agent_uuid must not be empty"));
        }

        let os_info = OsInfo::from(req.os_info.unwrap_or_default());
        let instance_id = self
            .node
            .services
            .instances
            .get_or_create_instance_id(
                req.application_id,
                &req.agent_uuid,
                req.register_time,
                &os_info,
            )
            .await?;

        Ok(InstanceMapping {
            application_id: req.application_id,
            instance_id,
        })
    }

    async fn handle_recover_instance(&self, req: RecoverRequest) -> HandlerResult<Ack> {
        self.ensure_running()?;
        if req.instance_id == 0 {
            return Err(invalid("instance_id must not be 0"));
        }
        if req.application_id == 0 {
            return Err(invalid("application_id must not be 0"));
        }
        if req.agent_uuid.is_empty() {
            return Err(invalid("agent_uuid must not be empty"));
        }

        let os_info = OsInfo::from(req.os_info.unwrap_or_default());
        self.node
            .services
            .instances
            .recover(
                req.instance_id,
                req.application_id,
                &req.agent_uuid,
                req.register_time,
                &os_info,
            )
            .await?;
        Ok(Ack {})
    }

    async fn handle_heartbeat(&self, req: HeartbeatRequest) -> HandlerResult<Ack> {
        self.ensure_running()?;
        if req.instance_id == 0 {
            return Err(invalid("instance_id must not be 0"));
        }

        let heartbeat_time = match req.heartbeat_time {
            0 => now_millis(),
            time => time,
        };
        self.node
            .services
            .instances
            .heartbeat(req.instance_id, heartbeat_time)
            .await?;
        Ok(Ack {})
    }

    async fn handle_discover_service_name(&self, req: ServiceNames) -> HandlerResult<ServiceNameMapping> {
        self.ensure_running()?;
        if req.elements.is_empty() {
            return Err(invalid("elements must not be empty"));
        }

        let service_names = &self.node.services.service_names;
        let mut mapping = Vec::with_capacity(req.elements.len());
        for element in req.elements {
            if element.service_name.is_empty() {
                return Err(invalid("service_name must not be empty"));
            }
            let service_id = service_names
                .get_or_create_service_id(element.application_id, &element.service_name)
                .await?;
            if service_id != 0 {
                mapping.push(ServiceNameMappingElement {
                    service_id,
                    element: Some(ServiceNameElement {
                        application_id: element.application_id,
                        service_name: element.service_name,
                    }),
                });
            }
        }

        Ok(ServiceNameMapping { elements: mapping })
    }
}

fn invalid(reason: &str) -> Error {
    Error::InvalidRequest {
        reason: reason.to_string(),
    }
}

/// Records request metrics around one RPC and converts its error.
fn observe<T>(
    operation: &'static str,
    start: Instant,
    result: HandlerResult<T>,
) -> Result<Response<T>, Status> {
    increment_register_requests(operation);
    record_register_duration(operation, start.elapsed().as_secs_f64() * 1_000.0);
    match result {
        Ok(reply) => Ok(Response::new(reply)),
        Err(e) => {
            increment_register_errors(operation);
            #[cfg(feature = "tracing")]
            tracing::warn!("{} failed: {}", operation, e);
            Err(e.into())
        }
    }
}

#[tonic::async_trait]
impl Register for RegisterHandler {
    #[cfg_attr(feature = "tracing", tracing::instrument(skip_all, fields(codes = req.get_ref().application_codes.len())))]
    async fn register_application(
        &self,
        req: Request<Applications>,
    ) -> Result<Response<ApplicationMapping>, Status> {
        let start = Instant::now();
        let result = self.handle_register_application(req.into_inner()).await;
        observe("register_application", start, result)
    }

    #[cfg_attr(feature = "tracing", tracing::instrument(skip_all, fields(application_id = req.get_ref().application_id)))]
    async fn register_instance(
        &self,
        req: Request<InstanceRequest>,
    ) -> Result<Response<InstanceMapping>, Status> {
        let start = Instant::now();
        let result = self.handle_register_instance(req.into_inner()).await;
        observe("register_instance", start, result)
    }

    #[cfg_attr(feature = "tracing", tracing::instrument(skip_all, fields(instance_id = req.get_ref().instance_id)))]
    async fn recover_instance(&self, req: Request<RecoverRequest>) -> Result<Response<Ack>, Status> {
        let start = Instant::now();
        let result = self.handle_recover_instance(req.into_inner()).await;
        observe("recover_instance", start, result)
    }

    async fn heartbeat(&self, req: Request<HeartbeatRequest>) -> Result<Response<Ack>, Status> {
        let start = Instant::now();
        let result = self.handle_heartbeat(req.into_inner()).await;
        observe("heartbeat", start, result)
    }

    #[cfg_attr(feature = "tracing", tracing::instrument(skip_all, fields(names = req.get_ref().elements.len())))]
    async fn discover_service_name(
        &self,
        req: Request<ServiceNames>,
    ) -> Result<Response<ServiceNameMapping>, Status> {
        let start = Instant::now();
        let result = self.handle_discover_service_name(req.into_inner()).await;
        observe("discover_service_name", start, result)
    }
}
