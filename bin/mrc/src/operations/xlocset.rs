use super::Response;
use crate::context::MrcContext;
use mrc_common::{Error, GlobalFileId, Result, XLocSet};
use mrc_xcap::{Capability, now_millis};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetXLocSetArgs {
    pub xcap: Capability,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenewCapabilityArgs {
    pub xcap: Capability,
}

/// Current replica list of the file a valid capability was issued for
pub(super) fn get(ctx: &MrcContext, args: GetXLocSetArgs) -> Result<Response> {
    args.xcap
        .validate(&ctx.config.capability.secret, now_millis())?;
    let file_id: GlobalFileId = args.xcap.file_id.parse()?;
    let sm = ctx.volume(&file_id.volume_id)?;
    let file = sm
        .get_metadata(file_id.file_id)?
        .ok_or_else(|| Error::not_found(format!("file {file_id}")))?;
    let read_only_size = if file.read_only { file.size } else { 0 };
    Ok(Response::XLocSet(XLocSet::from_list(
        &file.xloc_list,
        read_only_size,
    )))
}

pub(super) fn renew(ctx: &MrcContext, args: RenewCapabilityArgs) -> Result<Response> {
    let config = &ctx.config.capability;
    let renewed = args.xcap.renew(
        &config.secret,
        config.timeout_s,
        config.max_renewals,
        now_millis(),
    )?;
    Ok(Response::Capability(renewed))
}
