// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The hardware layer argument: twelve 64-bit words describing one
//! convolutional layer to the accelerator.
//!
//! The model compiler emits these verbatim into the artifact; the driver
//! patches the three in-model pointers (weights, batch-norm, activation
//! table) and streams the words into the register-file FIFO. The word order
//! is part of the hardware ABI.

use modular_bitfield::prelude::*;

/// Size of an encoded layer argument in the model buffer.
pub const LAYER_ARGUMENT_BYTES: usize = 96;

/// Number of FIFO words per layer argument.
pub const LAYER_ARGUMENT_WORDS: usize = 12;

#[bitfield(bits = 64)]
#[derive(Clone, Copy)]
pub struct InterruptEnable {
    pub int_en: bool,
    pub ram_flag: bool,
    pub full_add: bool,
    pub depth_wise_layer: bool,
    #[skip]
    __: B60,
}

#[bitfield(bits = 64)]
#[derive(Clone, Copy)]
pub struct ImageAddress {
    pub image_src_addr: B15,
    #[skip]
    __: B17,
    pub image_dst_addr: B15,
    #[skip]
    ___: B17,
}

#[bitfield(bits = 64)]
#[derive(Clone, Copy)]
pub struct ImageChannelNum {
    pub i_ch_num: B10,
    #[skip]
    __: B22,
    pub o_ch_num: B10,
    #[skip]
    ___: B6,
    pub o_ch_num_coef: B10,
    #[skip]
    ____: B6,
}

#[bitfield(bits = 64)]
#[derive(Clone, Copy)]
pub struct ImageSize {
    pub i_row_wid: B10,
    pub i_col_high: B9,
    #[skip]
    __: B13,
    pub o_row_wid: B10,
    pub o_col_high: B9,
    #[skip]
    ___: B13,
}

#[bitfield(bits = 64)]
#[derive(Clone, Copy)]
pub struct KernelPoolTypeCfg {
    pub kernel_type: B3,
    pub pad_type: B1,
    pub pool_type: B4,
    pub first_stride: B1,
    pub bypass_conv: B1,
    pub load_para: B1,
    #[skip]
    __: B5,
    pub dma_burst_size: B8,
    pub pad_value: B8,
    pub bwsx_base_addr: B32,
}

#[bitfield(bits = 64)]
#[derive(Clone, Copy)]
pub struct KernelLoadCfg {
    pub load_coor: B1,
    pub load_time: B6,
    #[skip]
    __: B8,
    pub para_size: B17,
    pub para_start_addr: B32,
}

#[bitfield(bits = 64)]
#[derive(Clone, Copy)]
pub struct KernelOffset {
    pub coef_column_offset: B4,
    pub coef_row_offset: B12,
    #[skip]
    __: B48,
}

#[bitfield(bits = 64)]
#[derive(Clone, Copy)]
pub struct KernelCalcTypeCfg {
    pub channel_switch_addr: B15,
    pub row_switch_addr: B4,
    pub coef_size: B8,
    pub coef_group: B3,
    pub load_act: B1,
    #[skip]
    __: B1,
    pub active_addr: B32,
}

#[bitfield(bits = 64)]
#[derive(Clone, Copy)]
pub struct WriteBackCfg {
    pub wb_channel_switch_addr: B15,
    pub wb_row_switch_addr: B4,
    pub wb_group: B3,
    #[skip]
    __: B42,
}

#[bitfield(bits = 64)]
#[derive(Clone, Copy)]
pub struct ConvValue {
    pub shr_w: B4,
    pub shr_x: B4,
    pub arg_w: B24,
    pub arg_x: B24,
    #[skip]
    __: B8,
}

#[bitfield(bits = 64)]
#[derive(Clone, Copy)]
pub struct ConvValue2 {
    pub arg_add: B40,
    #[skip]
    __: B24,
}

#[bitfield(bits = 64)]
#[derive(Clone, Copy)]
pub struct DmaParameter {
    pub send_data_out: bool,
    #[skip]
    __: B15,
    pub channel_byte_num: B16,
    pub dma_total_byte: B32,
}

/// One decoded hardware layer argument.
#[derive(Clone, Copy)]
pub struct LayerArgument {
    pub interrupt_enable: InterruptEnable,
    pub image_addr: ImageAddress,
    pub image_channel_num: ImageChannelNum,
    pub image_size: ImageSize,
    pub kernel_pool_type_cfg: KernelPoolTypeCfg,
    pub kernel_load_cfg: KernelLoadCfg,
    pub kernel_offset: KernelOffset,
    pub kernel_calc_type_cfg: KernelCalcTypeCfg,
    pub write_back_cfg: WriteBackCfg,
    pub conv_value: ConvValue,
    pub conv_value2: ConvValue2,
    pub dma_parameter: DmaParameter,
}

impl LayerArgument {
    /// Decodes a layer argument from its little-endian encoding in the
    /// model buffer.
    pub fn from_bytes(bytes: &[u8; LAYER_ARGUMENT_BYTES]) -> Self {
        let word = |i: usize| -> [u8; 8] { bytes[i * 8..(i + 1) * 8].try_into().unwrap() };
        Self {
            interrupt_enable: InterruptEnable::from_bytes(word(0)),
            image_addr: ImageAddress::from_bytes(word(1)),
            image_channel_num: ImageChannelNum::from_bytes(word(2)),
            image_size: ImageSize::from_bytes(word(3)),
            kernel_pool_type_cfg: KernelPoolTypeCfg::from_bytes(word(4)),
            kernel_load_cfg: KernelLoadCfg::from_bytes(word(5)),
            kernel_offset: KernelOffset::from_bytes(word(6)),
            kernel_calc_type_cfg: KernelCalcTypeCfg::from_bytes(word(7)),
            write_back_cfg: WriteBackCfg::from_bytes(word(8)),
            conv_value: ConvValue::from_bytes(word(9)),
            conv_value2: ConvValue2::from_bytes(word(10)),
            dma_parameter: DmaParameter::from_bytes(word(11)),
        }
    }

    /// The FIFO word sequence, in the order the hardware expects.
    pub fn to_words(&self) -> [u64; LAYER_ARGUMENT_WORDS] {
        let w = |bytes: [u8; 8]| u64::from_le_bytes(bytes);
        [
            w(self.interrupt_enable.into_bytes()),
            w(self.image_addr.into_bytes()),
            w(self.image_channel_num.into_bytes()),
            w(self.image_size.into_bytes()),
            w(self.kernel_pool_type_cfg.into_bytes()),
            w(self.kernel_load_cfg.into_bytes()),
            w(self.kernel_offset.into_bytes()),
            w(self.kernel_calc_type_cfg.into_bytes()),
            w(self.write_back_cfg.into_bytes()),
            w(self.conv_value.into_bytes()),
            w(self.conv_value2.into_bytes()),
            w(self.dma_parameter.into_bytes()),
        ]
    }

    /// Input image width in pixels (the register stores `width - 1`).
    pub fn input_width(&self) -> usize {
        self.image_size.i_row_wid() as usize + 1
    }

    /// Input image height in pixels.
    pub fn input_height(&self) -> usize {
        self.image_size.i_col_high() as usize + 1
    }

    /// Input channel count (the register stores `channels - 1`).
    pub fn input_channels(&self) -> usize {
        self.image_channel_num.i_ch_num() as usize + 1
    }

    /// Byte length of the staged input image in I/O RAM:
    /// `channel_switch_addr` rows of 64 bytes per channel.
    pub fn input_byte_len(&self) -> usize {
        self.kernel_calc_type_cfg.channel_switch_addr() as usize
            * crate::IO_RAM_ROW_BYTES
            * self.input_channels()
    }
}
