#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoLogEntry {
    #[prost(uint64, tag = "1")]
    pub index: u64,
    #[prost(uint64, tag = "2")]
    pub term: u64,
    #[prost(enumeration = "ProtoEntryType", tag = "3")]
    pub entry_type: i32,
    #[prost(bytes = "vec", tag = "4")]
    pub data: ::prost::alloc::vec::Vec<u8>,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoSnapshotMetadata {
    #[prost(uint64, tag = "1")]
    pub index: u64,
    #[prost(uint64, tag = "2")]
    pub term: u64,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoSnapshot {
    #[prost(message, optional, tag = "1")]
    pub metadata: ::core::option::Option<ProtoSnapshotMetadata>,
    #[prost(bytes = "vec", tag = "2")]
    pub data: ::prost::alloc::vec::Vec<u8>,
}
/// `vote` is -1 when we haven't voted in `term`.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoHardState {
    #[prost(uint64, tag = "1")]
    pub term: u64,
    #[prost(int64, tag = "2")]
    pub vote: i64,
    #[prost(uint64, tag = "3")]
    pub commit: u64,
}
/// Contents of the `raft-state` file.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoPersistedState {
    #[prost(message, optional, tag = "1")]
    pub hard_state: ::core::option::Option<ProtoHardState>,
    #[prost(message, repeated, tag = "2")]
    pub entries: ::prost::alloc::vec::Vec<ProtoLogEntry>,
}
// -- RequestVote --

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoRequestVoteReq {
    #[prost(uint64, tag = "1")]
    pub term: u64,
    #[prost(uint64, tag = "2")]
    pub candidate_id: u64,
    #[prost(uint64, tag = "3")]
    pub last_log_index: u64,
    #[prost(uint64, tag = "4")]
    pub last_log_term: u64,
}
/// `leader_id` is -1 when the replying node doesn't know the leader.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoRequestVoteReply {
    #[prost(uint64, tag = "1")]
    pub term: u64,
    #[prost(int64, tag = "2")]
    pub leader_id: i64,
    #[prost(bool, tag = "3")]
    pub vote_granted: bool,
}
// -- AppendEntries --

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoAppendEntriesReq {
    #[prost(uint64, tag = "1")]
    pub term: u64,
    #[prost(uint64, tag = "2")]
    pub leader_id: u64,
    #[prost(uint64, tag = "3")]
    pub prev_log_index: u64,
    #[prost(uint64, tag = "4")]
    pub prev_log_term: u64,
    #[prost(message, repeated, tag = "5")]
    pub entries: ::prost::alloc::vec::Vec<ProtoLogEntry>,
    #[prost(uint64, tag = "6")]
    pub leader_commit: u64,
}
/// `conflict_term` is 0 when the follower has no entry at `prev_log_index`.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoAppendEntriesReply {
    #[prost(uint64, tag = "1")]
    pub term: u64,
    #[prost(int64, tag = "2")]
    pub leader_id: i64,
    #[prost(bool, tag = "3")]
    pub success: bool,
    #[prost(uint64, tag = "4")]
    pub next_index: u64,
    #[prost(uint64, tag = "5")]
    pub conflict_term: u64,
}
// -- InstallSnapshot --

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoInstallSnapshotReq {
    #[prost(uint64, tag = "1")]
    pub term: u64,
    #[prost(uint64, tag = "2")]
    pub leader_id: u64,
    #[prost(message, optional, tag = "3")]
    pub snapshot: ::core::option::Option<ProtoSnapshot>,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoInstallSnapshotReply {
    #[prost(uint64, tag = "1")]
    pub term: u64,
    #[prost(int64, tag = "2")]
    pub leader_id: i64,
}
// -- Log data model --

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum ProtoEntryType {
    Normal = 0,
    Dummy = 1,
}
#[doc = r" Generated client implementations."]
pub mod grpc_raft_client {
    #![allow(unused_variables, dead_code, missing_docs)]
    use tonic::codegen::*;
    pub struct GrpcRaftClient<T> {
        inner: tonic::client::Grpc<T>,
    }
    impl GrpcRaftClient<tonic::transport::Channel> {
        #[doc = r" Attempt to create a new client by connecting to a given endpoint."]
        pub async fn connect<D>(dst: D) -> Result<Self, tonic::transport::Error>
        where
            D: std::convert::TryInto<tonic::transport::Endpoint>,
            D::Error: Into<StdError>,
        {
            let conn = tonic::transport::Endpoint::new(dst)?.connect().await?;
            Ok(Self::new(conn))
        }
    }
    impl<T> GrpcRaftClient<T>
    where
        T: tonic::client::GrpcService<tonic::body::BoxBody>,
        T::ResponseBody: Body + HttpBody + Send + 'static,
        T::Error: Into<StdError>,
        <T::ResponseBody as HttpBody>::Error: Into<StdError> + Send,
    {
        pub fn new(inner: T) -> Self {
            let inner = tonic::client::Grpc::new(inner);
            Self { inner }
        }
        pub fn with_interceptor(inner: T, interceptor: impl Into<tonic::Interceptor>) -> Self {
            let inner = tonic::client::Grpc::with_interceptor(inner, interceptor);
            Self { inner }
        }
        pub async fn request_vote(
            &mut self,
            request: impl tonic::IntoRequest<super::ProtoRequestVoteReq>,
        ) -> Result<tonic::Response<super::ProtoRequestVoteReply>, tonic::Status> {
            self.inner.ready().await.map_err(|e| {
                tonic::Status::new(
                    tonic::Code::Unknown,
                    format!("Service was not ready: {}", e.into()),
                )
            })?;
            let codec = tonic::codec::ProstCodec::default();
            let path = http::uri::PathAndQuery::from_static("/raft.GrpcRaft/RequestVote");
            self.inner.unary(request.into_request(), path, codec).await
        }
        pub async fn append_entries(
            &mut self,
            request: impl tonic::IntoRequest<super::ProtoAppendEntriesReq>,
        ) -> Result<tonic::Response<super::ProtoAppendEntriesReply>, tonic::Status> {
            self.inner.ready().await.map_err(|e| {
                tonic::Status::new(
                    tonic::Code::Unknown,
                    format!("Service was not ready: {}", e.into()),
                )
            })?;
            let codec = tonic::codec::ProstCodec::default();
            let path = http::uri::PathAndQuery::from_static("/raft.GrpcRaft/AppendEntries");
            self.inner.unary(request.into_request(), path, codec).await
        }
        pub async fn install_snapshot(
            &mut self,
            request: impl tonic::IntoRequest<super::ProtoInstallSnapshotReq>,
        ) -> Result<tonic::Response<super::ProtoInstallSnapshotReply>, tonic::Status> {
            self.inner.ready().await.map_err(|e| {
                tonic::Status::new(
                    tonic::Code::Unknown,
                    format!("Service was not ready: {}", e.into()),
                )
            })?;
            let codec = tonic::codec::ProstCodec::default();
            let path = http::uri::PathAndQuery::from_static("/raft.GrpcRaft/InstallSnapshot");
            self.inner.unary(request.into_request(), path, codec).await
        }
    }
    impl<T: Clone> Clone for GrpcRaftClient<T> {
        fn clone(&self) -> Self {
            Self {
                inner: self.inner.clone(),
            }
        }
    }
    impl<T> std::fmt::Debug for GrpcRaftClient<T> {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "GrpcRaftClient {{ ... }}")
        }
    }
}
#[doc = r" Generated server implementations."]
pub mod grpc_raft_server {
    #![allow(unused_variables, dead_code, missing_docs)]
    use tonic::codegen::*;
    #[doc = "Generated trait containing gRPC methods that should be implemented for use with GrpcRaftServer."]
    #[async_trait]
    pub trait GrpcRaft: Send + Sync + 'static {
        async fn request_vote(
            &self,
            request: tonic::Request<super::ProtoRequestVoteReq>,
        ) -> Result<tonic::Response<super::ProtoRequestVoteReply>, tonic::Status>;
        async fn append_entries(
            &self,
            request: tonic::Request<super::ProtoAppendEntriesReq>,
        ) -> Result<tonic::Response<super::ProtoAppendEntriesReply>, tonic::Status>;
        async fn install_snapshot(
            &self,
            request: tonic::Request<super::ProtoInstallSnapshotReq>,
        ) -> Result<tonic::Response<super::ProtoInstallSnapshotReply>, tonic::Status>;
    }
    #[derive(Debug)]
    pub struct GrpcRaftServer<T: GrpcRaft> {
        inner: _Inner<T>,
    }
    struct _Inner<T>(Arc<T>, Option<tonic::Interceptor>);
    impl<T: GrpcRaft> GrpcRaftServer<T> {
        pub fn new(inner: T) -> Self {
            let inner = Arc::new(inner);
            let inner = _Inner(inner, None);
            Self { inner }
        }
        pub fn with_interceptor(inner: T, interceptor: impl Into<tonic::Interceptor>) -> Self {
            let inner = Arc::new(inner);
            let inner = _Inner(inner, Some(interceptor.into()));
            Self { inner }
        }
    }
    impl<T, B> Service<http::Request<B>> for GrpcRaftServer<T>
    where
        T: GrpcRaft,
        B: HttpBody + Send + Sync + 'static,
        B::Error: Into<StdError> + Send + 'static,
    {
        type Response = http::Response<tonic::body::BoxBody>;
        type Error = Never;
        type Future = BoxFuture<Self::Response, Self::Error>;
        fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }
        fn call(&mut self, req: http::Request<B>) -> Self::Future {
            let inner = self.inner.clone();
            match req.uri().path() {
                "/raft.GrpcRaft/RequestVote" => {
                    #[allow(non_camel_case_types)]
                    struct RequestVoteSvc<T: GrpcRaft>(pub Arc<T>);
                    impl<T: GrpcRaft> tonic::server::UnaryService<super::ProtoRequestVoteReq> for RequestVoteSvc<T> {
                        type Response = super::ProtoRequestVoteReply;
                        type Future = BoxFuture<tonic::Response<Self::Response>, tonic::Status>;
                        fn call(
                            &mut self,
                            request: tonic::Request<super::ProtoRequestVoteReq>,
                        ) -> Self::Future {
                            let inner = self.0.clone();
                            let fut = async move { (*inner).request_vote(request).await };
                            Box::pin(fut)
                        }
                    }
                    let inner = self.inner.clone();
                    let fut = async move {
                        let interceptor = inner.1.clone();
                        let inner = inner.0;
                        let method = RequestVoteSvc(inner);
                        let codec = tonic::codec::ProstCodec::default();
                        let mut grpc = if let Some(interceptor) = interceptor {
                            tonic::server::Grpc::with_interceptor(codec, interceptor)
                        } else {
                            tonic::server::Grpc::new(codec)
                        };
                        let res = grpc.unary(method, req).await;
                        Ok(res)
                    };
                    Box::pin(fut)
                }
                "/raft.GrpcRaft/AppendEntries" => {
                    #[allow(non_camel_case_types)]
                    struct AppendEntriesSvc<T: GrpcRaft>(pub Arc<T>);
                    impl<T: GrpcRaft> tonic::server::UnaryService<super::ProtoAppendEntriesReq>
                        for AppendEntriesSvc<T>
                    {
                        type Response = super::ProtoAppendEntriesReply;
                        type Future = BoxFuture<tonic::Response<Self::Response>, tonic::Status>;
                        fn call(
                            &mut self,
                            request: tonic::Request<super::ProtoAppendEntriesReq>,
                        ) -> Self::Future {
                            let inner = self.0.clone();
                            let fut = async move { (*inner).append_entries(request).await };
                            Box::pin(fut)
                        }
                    }
                    let inner = self.inner.clone();
                    let fut = async move {
                        let interceptor = inner.1.clone();
                        let inner = inner.0;
                        let method = AppendEntriesSvc(inner);
                        let codec = tonic::codec::ProstCodec::default();
                        let mut grpc = if let Some(interceptor) = interceptor {
                            tonic::server::Grpc::with_interceptor(codec, interceptor)
                        } else {
                            tonic::server::Grpc::new(codec)
                        };
                        let res = grpc.unary(method, req).await;
                        Ok(res)
                    };
                    Box::pin(fut)
                }
                "/raft.GrpcRaft/InstallSnapshot" => {
                    #[allow(non_camel_case_types)]
                    struct InstallSnapshotSvc<T: GrpcRaft>(pub Arc<T>);
                    impl<T: GrpcRaft> tonic::server::UnaryService<super::ProtoInstallSnapshotReq>
                        for InstallSnapshotSvc<T>
                    {
                        type Response = super::ProtoInstallSnapshotReply;
                        type Future = BoxFuture<tonic::Response<Self::Response>, tonic::Status>;
                        fn call(
                            &mut self,
                            request: tonic::Request<super::ProtoInstallSnapshotReq>,
                        ) -> Self::Future {
                            let inner = self.0.clone();
                            let fut = async move { (*inner).install_snapshot(request).await };
                            Box::pin(fut)
                        }
                    }
                    let inner = self.inner.clone();
                    let fut = async move {
                        let interceptor = inner.1.clone();
                        let inner = inner.0;
                        let method = InstallSnapshotSvc(inner);
                        let codec = tonic::codec::ProstCodec::default();
                        let mut grpc = if let Some(interceptor) = interceptor {
                            tonic::server::Grpc::with_interceptor(codec, interceptor)
                        } else {
                            tonic::server::Grpc::new(codec)
                        };
                        let res = grpc.unary(method, req).await;
                        Ok(res)
                    };
                    Box::pin(fut)
                }
                _ => Box::pin(async move {
                    Ok(http::Response::builder()
                        .status(200)
                        .header("grpc-status", "12")
                        .header("content-type", "application/grpc")
                        .body(tonic::body::BoxBody::empty())
                        .unwrap())
                }),
            }
        }
    }
    impl<T: GrpcRaft> Clone for GrpcRaftServer<T> {
        fn clone(&self) -> Self {
            let inner = self.inner.clone();
            Self { inner }
        }
    }
    impl<T: GrpcRaft> Clone for _Inner<T> {
        fn clone(&self) -> Self {
            Self(self.0.clone(), self.1.clone())
        }
    }
    impl<T: std::fmt::Debug> std::fmt::Debug for _Inner<T> {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{:?}", self.0)
        }
    }
    impl<T: GrpcRaft> tonic::transport::NamedService for GrpcRaftServer<T> {
        const NAME: &'static str = "raft.GrpcRaft";
    }
}
