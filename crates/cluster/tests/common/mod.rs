//! Helpers shared by the request builder tests.

#![allow(dead_code)]

use std::net::IpAddr;
use std::path::Path;

use async_trait::async_trait;
use clap::Parser;
use machinery::{GenOption, IfaceSelector};
use provision::providers::https_endpoint;
use provision::{
    Cluster, ClusterInfo, ClusterRequest, NetworkInfo, NetworkRequest, NodeInfo, Options, Provider,
    ProviderError,
};
use talos_cluster::options::CommonOptions;

/// Provider that records nothing and touches nothing.
#[derive(Default)]
pub struct FakeProvider {
    pub api_endpoints: Vec<String>,
}

#[async_trait]
impl Provider for FakeProvider {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn create(
        &self,
        request: &ClusterRequest,
        _options: &Options,
    ) -> Result<Cluster, ProviderError> {
        let nodes = request
            .nodes
            .iter()
            .map(|node| NodeInfo {
                id: node.name.clone(),
                uuid: node.uuid,
                name: node.name.clone(),
                machine_type: node.machine_type,
                ips: node.ips.clone(),
                nano_cpus: node.nano_cpus,
                memory: node.memory,
                disk_size: 0,
            })
            .collect();

        Ok(Cluster::new(
            self.name(),
            &request.state_directory.join(&request.name),
            ClusterInfo {
                cluster_name: request.name.clone(),
                network: NetworkInfo {
                    name: request.network.name.clone(),
                    cidrs: request.network.cidrs.clone(),
                    gateway_addrs: request.network.gateway_addrs.clone(),
                    mtu: request.network.mtu,
                },
                nodes,
                kubernetes_endpoint: None,
            },
        ))
    }

    async fn reflect(
        &self,
        cluster_name: &str,
        _state_directory: &Path,
    ) -> Result<Cluster, ProviderError> {
        Err(ProviderError::NotFound(cluster_name.to_string()))
    }

    async fn start(&self, _cluster: &Cluster) -> Result<(), ProviderError> {
        Ok(())
    }

    async fn destroy(&self, _cluster: &Cluster) -> Result<(), ProviderError> {
        Ok(())
    }

    async fn crash_dump(&self, _cluster: &Cluster, _out: &mut (dyn std::io::Write + Send)) {}

    async fn close(&self) -> Result<(), ProviderError> {
        Ok(())
    }

    fn gen_options(&self, _network: &NetworkRequest) -> Vec<GenOption> {
        vec![GenOption::Persist(false)]
    }

    fn in_cluster_kubernetes_control_plane_endpoint(
        &self,
        network: &NetworkRequest,
        port: u16,
    ) -> String {
        https_endpoint(network.first_node_address().unwrap(), port)
    }

    fn external_kubernetes_control_plane_endpoint(
        &self,
        _network: &NetworkRequest,
        port: u16,
    ) -> String {
        https_endpoint(IpAddr::from([127, 0, 0, 1]), port)
    }

    fn talos_api_endpoints(&self, _network: &NetworkRequest) -> Vec<String> {
        self.api_endpoints.clone()
    }

    fn first_interface(&self) -> IfaceSelector {
        IfaceSelector::Name("eth0".to_string())
    }

    fn user_disk_name(&self, index: usize) -> String {
        format!("/dev/vd{}", char::from(b'a' + u8::try_from(index).unwrap()))
    }
}

pub fn options(args: &[&str]) -> CommonOptions {
    CommonOptions::parse_from(std::iter::once("create").chain(args.iter().copied()))
}
